use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The smallest gap used when evaluating the interaction term, in m.
const MIN_EVAL_GAP: f64 = 0.01; // m

/// The intelligent driver model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Idm {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The desired time headway in s.
    pub t: f64,
    /// The minimum standstill gap in m.
    pub s0: f64,
    /// The speed-dependent gap in m.
    pub s1: f64,
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub a: f64,
    /// The comfortable deceleration in m/s<sup>2</sup>.
    pub b: f64,
    /// The acceleration exponent.
    pub delta: f64,
}

impl Default for Idm {
    fn default() -> Self {
        Self {
            v0: 30.0,
            t: 1.5,
            s0: 2.0,
            s1: 0.0,
            a: 1.0,
            b: 1.5,
            delta: 4.0,
        }
    }
}

impl Idm {
    pub(super) fn validated(self) -> Self {
        Self {
            v0: clamped("idm", "v0", self.v0, 0.1, 100.0),
            t: clamped("idm", "t", self.t, 0.0, 10.0),
            s0: clamped("idm", "s0", self.s0, 0.0, 50.0),
            s1: clamped("idm", "s1", self.s1, 0.0, 50.0),
            a: clamped("idm", "a", self.a, 0.01, 10.0),
            b: clamped("idm", "b", self.b, 0.01, 10.0),
            delta: clamped("idm", "delta", self.delta, 0.5, 10.0),
        }
    }

    /// The desired dynamic gap s*, never less than `s0`.
    pub fn desired_gap(&self, speed: f64, approach: f64, v0: f64) -> f64 {
        let dynamic = self.t * speed
            + self.s1 * (speed / v0).sqrt()
            + speed * approach / (2.0 * (self.a * self.b).sqrt());
        self.s0 + f64::max(dynamic, 0.0)
    }

    /// Computes the acceleration for the given desired speed `v0`.
    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64) -> f64 {
        let free = (input.speed / v0).powf(self.delta);
        let interaction = if input.gap.is_finite() {
            let ss = self.desired_gap(input.speed, input.approach, v0);
            (ss / f64::max(input.gap, MIN_EVAL_GAP)).powi(2)
        } else {
            0.0
        };
        self.a * (1.0 - free - interaction)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn free_road() {
        let idm = Idm::default();
        let acc = idm.acceleration(&ModelInput::free(0.0, 30.0, 0.1), 30.0);
        assert_approx_eq!(acc, 1.0);
        let acc = idm.acceleration(&ModelInput::free(30.0, 30.0, 0.1), 30.0);
        assert_approx_eq!(acc, 0.0);
    }

    #[test]
    fn equilibrium_gap() {
        let idm = Idm::default();
        // In steady following at speed v, the IDM gap is s* / sqrt(1 - (v/v0)^4)
        let v = 15.0;
        let ss = idm.desired_gap(v, 0.0, 30.0);
        assert_approx_eq!(ss, 2.0 + 1.5 * 15.0);
        let s_eq = ss / (1.0 - (v / 30.0_f64).powi(4)).sqrt();
        let acc = idm.acceleration(&ModelInput::following(s_eq, v, v, 30.0, 0.1), 30.0);
        assert_approx_eq!(acc, 0.0, 1e-9);
    }

    #[test]
    fn desired_gap_floored_at_s0() {
        let idm = Idm::default();
        // Approaching a much faster leader would make the dynamic term negative
        assert_approx_eq!(idm.desired_gap(10.0, -30.0, 30.0), idm.s0);
    }
}
