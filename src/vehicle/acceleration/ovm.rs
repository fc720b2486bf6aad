use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The optimal velocity model with a velocity difference term.
/// The vehicle relaxes towards an optimal velocity, which is a function of the gap.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimalVelocity {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The relaxation time in s.
    pub tau: f64,
    /// The minimum standstill gap in m.
    pub s0: f64,
    /// The sensitivity to the velocity difference, in 1/s.
    pub gamma: f64,
    /// The shape of the optimal velocity function.
    pub shape: OptimalVelocityShape,
}

/// The shape of an optimal velocity function.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimalVelocityShape {
    /// The hyperbolic tangent function of Bando et al.
    Tanh {
        /// The width of the transition region in m.
        transition_width: f64,
        /// The form factor.
        beta: f64,
    },
    /// A linear rise at a constant time gap, capped at the desired speed.
    Triangular {
        /// The time gap in s.
        time_gap: f64,
    },
    /// A function with a band of indifference between two time gaps.
    ThreePhase {
        /// The minimum time gap in s.
        t_min: f64,
        /// The maximum time gap in s.
        t_max: f64,
    },
}

impl Default for OptimalVelocity {
    fn default() -> Self {
        Self {
            v0: 16.0,
            tau: 0.65,
            s0: 2.0,
            gamma: 0.6,
            shape: OptimalVelocityShape::Tanh {
                transition_width: 8.34,
                beta: 1.5,
            },
        }
    }
}

impl OptimalVelocity {
    pub(super) fn validated(self) -> Self {
        use OptimalVelocityShape::*;
        let shape = match self.shape {
            Tanh {
                transition_width,
                beta,
            } => Tanh {
                transition_width: clamped("ovm", "transition_width", transition_width, 0.1, 100.0),
                beta: clamped("ovm", "beta", beta, 0.0, 10.0),
            },
            Triangular { time_gap } => Triangular {
                time_gap: clamped("ovm", "time_gap", time_gap, 0.1, 10.0),
            },
            ThreePhase { t_min, t_max } => {
                let t_min = clamped("ovm", "t_min", t_min, 0.1, 10.0);
                ThreePhase {
                    t_min,
                    t_max: clamped("ovm", "t_max", t_max, t_min, 20.0),
                }
            }
        };
        Self {
            v0: clamped("ovm", "v0", self.v0, 0.1, 100.0),
            tau: clamped("ovm", "tau", self.tau, 0.05, 20.0),
            s0: clamped("ovm", "s0", self.s0, 0.0, 50.0),
            gamma: clamped("ovm", "gamma", self.gamma, 0.0, 10.0),
            shape,
        }
    }

    /// The optimal velocity for the given gap and current speed.
    pub fn optimal_velocity(&self, gap: f64, speed: f64, v0: f64) -> f64 {
        let s = gap - self.s0;
        if s <= 0.0 {
            return 0.0;
        }
        match self.shape {
            OptimalVelocityShape::Tanh {
                transition_width,
                beta,
            } => {
                let scale = v0 / (1.0 + beta.tanh());
                f64::max(scale * ((s / transition_width - beta).tanh() + beta.tanh()), 0.0)
            }
            OptimalVelocityShape::Triangular { time_gap } => f64::min(s / time_gap, v0),
            OptimalVelocityShape::ThreePhase { t_min, t_max } => {
                let t_dyn = s / f64::max(speed, 1e-6);
                if t_dyn > t_max {
                    f64::min(s / t_max, v0)
                } else if t_dyn > t_min {
                    f64::min(speed, v0)
                } else {
                    f64::min(s / t_min, v0)
                }
            }
        }
    }

    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64) -> f64 {
        let v_opt = self.optimal_velocity(input.gap, input.speed, v0);
        let approach = if input.gap.is_finite() {
            input.approach
        } else {
            0.0
        };
        (v_opt - input.speed) / self.tau - self.gamma * approach
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn tanh_bounds() {
        let ovm = OptimalVelocity::default();
        assert_approx_eq!(ovm.optimal_velocity(2.0, 0.0, 16.0), 0.0);
        assert_approx_eq!(ovm.optimal_velocity(f64::INFINITY, 0.0, 16.0), 16.0);
        let mid = ovm.optimal_velocity(20.0, 0.0, 16.0);
        assert!(mid > 0.0 && mid < 16.0);
    }

    #[test]
    fn triangular() {
        let ovm = OptimalVelocity {
            shape: OptimalVelocityShape::Triangular { time_gap: 1.0 },
            ..OptimalVelocity::default()
        };
        assert_approx_eq!(ovm.optimal_velocity(12.0, 0.0, 16.0), 10.0);
        assert_approx_eq!(ovm.optimal_velocity(100.0, 0.0, 16.0), 16.0);
    }

    #[test]
    fn three_phase_indifference_band() {
        let ovm = OptimalVelocity {
            shape: OptimalVelocityShape::ThreePhase {
                t_min: 1.0,
                t_max: 2.0,
            },
            ..OptimalVelocity::default()
        };
        // Time gap of 1.5 s lies within the band, so the speed is kept
        assert_approx_eq!(ovm.optimal_velocity(2.0 + 15.0, 10.0, 16.0), 10.0);
        // Too close
        assert_approx_eq!(ovm.optimal_velocity(2.0 + 5.0, 10.0, 16.0), 5.0);
        // Too far
        assert_approx_eq!(ovm.optimal_velocity(2.0 + 30.0, 10.0, 16.0), 15.0);
    }

    #[test]
    fn velocity_difference_damps() {
        let ovm = OptimalVelocity::default();
        let closing = ovm.acceleration(&ModelInput::following(20.0, 10.0, 5.0, 30.0, 0.1), 16.0);
        let steady = ovm.acceleration(&ModelInput::following(20.0, 10.0, 10.0, 30.0, 0.1), 16.0);
        assert_approx_eq!(steady - closing, ovm.gamma * 5.0);
    }
}
