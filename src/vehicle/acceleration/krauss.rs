use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The Krauss model, a stochastic variant of the Gipps model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Krauss {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The update interval in s.
    pub t: f64,
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub a: f64,
    /// The deceleration in m/s<sup>2</sup>.
    pub b: f64,
    /// The minimum standstill gap in m.
    pub s0: f64,
    /// The amount of random damping, between 0 and 1.
    pub epsilon: f64,
}

impl Default for Krauss {
    fn default() -> Self {
        Self {
            v0: 30.0,
            t: 1.0,
            a: 1.5,
            b: 1.0,
            s0: 2.0,
            epsilon: 0.4,
        }
    }
}

impl Krauss {
    pub(super) fn validated(self) -> Self {
        Self {
            v0: clamped("krauss", "v0", self.v0, 0.1, 100.0),
            t: clamped("krauss", "t", self.t, 0.05, 5.0),
            a: clamped("krauss", "a", self.a, 0.01, 10.0),
            b: clamped("krauss", "b", self.b, 0.01, 10.0),
            s0: clamped("krauss", "s0", self.s0, 0.0, 50.0),
            epsilon: clamped("krauss", "epsilon", self.epsilon, 0.0, 1.0),
        }
    }

    /// The Krauss safe speed.
    pub fn safe_speed(&self, gap: f64, speed: f64, lead_speed: f64, step: f64) -> f64 {
        let gap = f64::max(gap - self.s0, 0.0);
        let tau_b = (speed + lead_speed) / (2.0 * self.b);
        lead_speed + (gap - lead_speed * step) / (tau_b + step)
    }

    /// # Parameters
    /// * `noise` - A uniform random number in `[0, 1)`, or `None` for no damping.
    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64, noise: Option<f64>) -> f64 {
        let step = self.t.max(input.dt);
        let v = input.speed;
        let v_safe = self.safe_speed(input.gap, v, input.lead_speed(), step);
        let v_upper = v_safe.min(v + self.a * step).min(v0).max(0.0);
        let v_new = match noise {
            Some(r) => {
                let v_lower = (1.0 - self.epsilon) * v_upper
                    + self.epsilon * f64::max(v - self.b * step, 0.0).min(v_upper);
                v_lower + r * (v_upper - v_lower)
            }
            None => v_upper,
        };
        (v_new.max(0.0) - v) / step
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn damping_only_slows() {
        let krauss = Krauss::default();
        let input = ModelInput::free(10.0, 30.0, 0.1);
        let undamped = krauss.acceleration(&input, 30.0, None);
        for i in 0..10 {
            let r = i as f64 / 10.0;
            let damped = krauss.acceleration(&input, 30.0, Some(r));
            assert!(damped <= undamped + 1e-12);
        }
    }

    #[test]
    fn zero_epsilon_is_deterministic() {
        let krauss = Krauss {
            epsilon: 0.0,
            ..Krauss::default()
        };
        let input = ModelInput::following(30.0, 10.0, 8.0, 30.0, 0.1);
        let a = krauss.acceleration(&input, 30.0, Some(0.0));
        let b = krauss.acceleration(&input, 30.0, Some(0.99));
        assert!((a - b).abs() < 1e-12);
    }
}
