use super::{clamped, ModelInput};
use serde::{Deserialize, Serialize};

/// The Nagel-Schreckenberg cellular automaton, with slow-to-start behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Nsm {
    /// The desired speed in m/s.
    pub v0: f64,
    /// The length of a cell in m.
    pub cell_length: f64,
    /// The update interval in s.
    pub dt: f64,
    /// The probability of randomly slowing down.
    pub p_slowdown: f64,
    /// The probability of randomly slowing down when stopped.
    pub p_slow_to_start: f64,
}

impl Default for Nsm {
    fn default() -> Self {
        Self {
            v0: 37.5,
            cell_length: 7.5,
            dt: 1.0,
            p_slowdown: 0.16,
            p_slow_to_start: 0.5,
        }
    }
}

impl Nsm {
    pub(super) fn validated(self) -> Self {
        Self {
            v0: clamped("nsm", "v0", self.v0, 0.1, 100.0),
            cell_length: clamped("nsm", "cell_length", self.cell_length, 0.1, 20.0),
            dt: clamped("nsm", "dt", self.dt, 0.1, 5.0),
            p_slowdown: clamped("nsm", "p_slowdown", self.p_slowdown, 0.0, 1.0),
            p_slow_to_start: clamped("nsm", "p_slow_to_start", self.p_slow_to_start, 0.0, 1.0),
        }
    }

    /// Converts a speed in m/s into cells per update of `step` seconds.
    fn to_cells(&self, speed: f64, step: f64) -> f64 {
        (speed * step / self.cell_length).round()
    }

    /// # Parameters
    /// * `noise` - A uniform random number in `[0, 1)`, or `None` for no random slowdown.
    pub(super) fn acceleration(&self, input: &ModelInput, v0: f64, noise: Option<f64>) -> f64 {
        // The vehicle jumps once per update, which is never shorter than the simulation step
        let step = self.dt.max(input.dt);
        let v = self.to_cells(input.speed, step);
        let v_max = f64::max(self.to_cells(v0, step), 1.0);
        let gap = (input.gap / self.cell_length).floor().max(0.0);

        let mut v_new = (v + 1.0).min(v_max).min(gap);
        let p = if v < 1.0 {
            self.p_slow_to_start
        } else {
            self.p_slowdown
        };
        if noise.map_or(false, |r| r < p) {
            v_new = f64::max(v_new - 1.0, 0.0);
        }

        (v_new * self.cell_length / step - input.speed) / step
    }
}
