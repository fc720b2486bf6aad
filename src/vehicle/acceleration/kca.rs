use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The Kerner-Klenov-Wolf cellular automaton, a three-phase model with a
/// synchronisation distance and speed-dependent random acceleration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Kca {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The length of a cell in m.
    pub cell_length: f64,
    /// The update interval in s.
    pub dt: f64,
    /// The synchronisation distance factor.
    pub k: f64,
    /// The probability of random deceleration when stopped.
    pub pb0: f64,
    /// The probability of random deceleration when moving.
    pub pb1: f64,
    /// The probability of random acceleration below `vp`.
    pub pa1: f64,
    /// The probability of random acceleration above `vp`.
    pub pa2: f64,
    /// The speed separating the acceleration probabilities, in m/s.
    pub vp: f64,
}

impl Default for Kca {
    fn default() -> Self {
        Self {
            v0: 30.0,
            cell_length: 0.5,
            dt: 1.0,
            k: 2.55,
            pb0: 0.425,
            pb1: 0.04,
            pa1: 0.2,
            pa2: 0.052,
            vp: 14.0,
        }
    }
}

impl Kca {
    pub(super) fn validated(self) -> Self {
        let pb0 = clamped("kca", "pb0", self.pb0, 0.0, 1.0);
        let pb1 = clamped("kca", "pb1", self.pb1, 0.0, 1.0);
        Self {
            v0: clamped("kca", "v0", self.v0, 0.1, 100.0),
            cell_length: clamped("kca", "cell_length", self.cell_length, 0.01, 20.0),
            dt: clamped("kca", "dt", self.dt, 0.1, 5.0),
            k: clamped("kca", "k", self.k, 1.0, 10.0),
            pb0,
            pb1,
            pa1: clamped("kca", "pa1", self.pa1, 0.0, 1.0 - pb0.max(pb1)),
            pa2: clamped("kca", "pa2", self.pa2, 0.0, 1.0 - pb0.max(pb1)),
            vp: clamped("kca", "vp", self.vp, 0.0, 100.0),
        }
    }

    fn to_cells(&self, speed: f64, step: f64) -> f64 {
        (speed * step / self.cell_length).round()
    }

    /// The speed which cannot lead to a collision, in cells per update.
    /// Only the free cells ahead are assumed to be available.
    fn safe_speed(&self, gap: f64) -> f64 {
        (gap / self.cell_length).floor().max(0.0)
    }

    /// # Parameters
    /// * `noise` - A uniform random number in `[0, 1)`, or `None` for no random terms.
    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64, noise: Option<f64>) -> f64 {
        // The vehicle jumps once per update, which is never shorter than the simulation step
        let step = self.dt.max(input.dt);
        let v = self.to_cells(input.speed, step);
        let v_lead = self.to_cells(input.lead_speed(), step);
        let v_max = f64::max(self.to_cells(v0, step), 1.0);
        let gap = (input.gap / self.cell_length).floor().max(0.0);
        let v_safe = self.safe_speed(input.gap);

        // Accelerate beyond the synchronisation distance, otherwise adapt to the leader
        let sync_dist = self.k * v;
        let v_desired = if gap > sync_dist {
            v + 1.0
        } else {
            v + (v_lead - v).signum() * f64::from((v_lead - v).abs() > 0.5)
        };
        let v_tilde = v_desired.min(v_safe).min(v_max).max(0.0);

        let eta = match noise {
            Some(r) => {
                let pb = if v < 1.0 { self.pb0 } else { self.pb1 };
                let pa = if v < self.to_cells(self.vp, step) {
                    self.pa1
                } else {
                    self.pa2
                };
                if r < pb {
                    -1.0
                } else if r < pb + pa {
                    1.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        let v_new = (v_tilde + eta).min(v + 1.0).min(v_max).min(v_safe).max(0.0);

        (v_new * self.cell_length / step - input.speed) / step
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn synchronises_with_leader() {
        let kca = Kca::default();
        // Inside the synchronisation distance and faster than the leader
        let input = ModelInput::following(20.0, 10.0, 8.0, 30.0, 1.0);
        let acc = kca.acceleration(&input, 30.0, None);
        assert_approx_eq!(acc, -0.5);
    }

    #[test]
    fn never_exceeds_safe_speed() {
        let kca = Kca::default();
        let input = ModelInput::following(3.2, 10.0, 10.0, 30.0, 1.0);
        for i in 0..10 {
            let acc = kca.acceleration(&input, 30.0, Some(i as f64 / 10.0));
            assert!(10.0 + acc <= 3.0 + 1e-9);
        }
    }

    #[test]
    fn long_step_stays_behind_leader() {
        let kca = Kca::default();
        let input = ModelInput::following(3.2, 10.0, 10.0, 30.0, 2.0);
        for i in 0..10 {
            let acc = kca.acceleration(&input, 30.0, Some(i as f64 / 10.0));
            let speed = 10.0 + acc * 2.0;
            assert!(speed >= -1e-9);
            assert!(speed * 2.0 <= 3.2 + 1e-9);
        }
    }
}
