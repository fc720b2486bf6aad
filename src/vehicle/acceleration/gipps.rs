use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The Gipps model, an iterated map with a safe braking speed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Gipps {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The update interval (reaction time) in s.
    pub t: f64,
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub a: f64,
    /// The deceleration in m/s<sup>2</sup>.
    pub b: f64,
    /// The minimum standstill gap in m.
    pub s0: f64,
}

impl Default for Gipps {
    fn default() -> Self {
        Self {
            v0: 30.0,
            t: 0.5,
            a: 1.5,
            b: 1.0,
            s0: 2.0,
        }
    }
}

impl Gipps {
    pub(super) fn validated(self) -> Self {
        Self {
            v0: clamped("gipps", "v0", self.v0, 0.1, 100.0),
            t: clamped("gipps", "t", self.t, 0.05, 5.0),
            a: clamped("gipps", "a", self.a, 0.01, 10.0),
            b: clamped("gipps", "b", self.b, 0.01, 10.0),
            s0: clamped("gipps", "s0", self.s0, 0.0, 50.0),
        }
    }

    /// The speed from which the vehicle can still stop behind
    /// the leader if the leader brakes.
    pub fn safe_speed(&self, gap: f64, lead_speed: f64, step: f64) -> f64 {
        let bt = self.b * step;
        -bt + (bt * bt + lead_speed * lead_speed + 2.0 * self.b * f64::max(gap - self.s0, 0.0)).sqrt()
    }

    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64) -> f64 {
        let step = self.t.max(input.dt);
        let v = input.speed;
        let v_safe = self.safe_speed(input.gap, input.lead_speed(), step);
        let v_free = f64::min(v + self.a * step, v0);
        let v_new = v_safe.min(v_free).max(0.0);
        (v_new - v) / step
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn acceleration_limited() {
        let gipps = Gipps::default();
        let acc = gipps.acceleration(&ModelInput::free(10.0, 30.0, 0.1), 30.0);
        assert_approx_eq!(acc, gipps.a);
    }

    #[test]
    fn stops_behind_stationary_leader() {
        let gipps = Gipps::default();
        let acc = gipps.acceleration(&ModelInput::following(2.0, 10.0, 0.0, 30.0, 0.1), 30.0);
        // At the standstill gap the safe speed is zero
        assert_approx_eq!(acc, -10.0 / gipps.t);
    }

    #[test]
    fn larger_step_is_honoured() {
        let gipps = Gipps::default();
        let acc = gipps.acceleration(&ModelInput::free(29.0, 30.0, 2.0), 30.0);
        assert_approx_eq!(acc, 0.5);
    }
}
