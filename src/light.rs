use crate::RoadSegmentId;
use serde::{Deserialize, Serialize};

/// The highest deceleration a vehicle will accept to stop for an amber light,
/// in m/s<sup>2</sup>. Vehicles which would need to brake harder drive on.
pub(crate) const AMBER_MAX_DECEL: f64 = 4.0; // m/s^2

/// The phase of a traffic light.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightStatus {
    Green,
    /// Amber, between green and red.
    GreenRed,
    Red,
    /// Red and amber, between red and green.
    RedGreen,
}

impl LightStatus {
    const ALL: [LightStatus; 4] = [Self::Green, Self::GreenRed, Self::Red, Self::RedGreen];

    /// Whether vehicles must stop at the light in this phase.
    /// Amber requires a stop only when it can be made comfortably.
    pub fn requires_stop(self) -> bool {
        matches!(self, Self::Red | Self::RedGreen)
    }
}

/// A fixed-time traffic light, which cycles through its four phases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficLight {
    /// The segment the light stands on.
    segment: RoadSegmentId,
    /// The position of the stop line along the segment, in m.
    pos: f64,
    /// The durations of the phases in s, in the order of [LightStatus::ALL].
    durations: [f64; 4],
    /// The phase shift in s.
    offset: f64,
    /// The time elapsed in the current cycle, in s.
    elapsed: f64,
}

impl TrafficLight {
    /// Creates a traffic light.
    ///
    /// # Parameters
    /// * `segment` - The segment the light stands on
    /// * `pos` - The position of the stop line
    /// * `durations` - The durations of the green, amber, red and red-amber phases
    /// * `offset` - The phase shift; the light starts this far into its cycle
    pub fn new(segment: RoadSegmentId, pos: f64, durations: [f64; 4], offset: f64) -> Self {
        let durations = durations.map(|d| d.max(0.0));
        let mut light = Self {
            segment,
            pos,
            durations,
            offset,
            elapsed: 0.0,
        };
        light.elapsed = light.wrap(offset);
        light
    }

    /// The segment the light stands on.
    pub fn segment(&self) -> RoadSegmentId {
        self.segment
    }

    /// The position of the stop line along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The phase shift in s.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// The durations of the green, amber, red and red-amber phases in s.
    pub fn durations(&self) -> [f64; 4] {
        self.durations
    }

    /// The total duration of one cycle in s.
    pub fn cycle_time(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// The time elapsed in the current cycle, in s.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// The cycle time at which each phase begins.
    fn phase_starts(&self) -> [f64; 4] {
        let [g, gr, r, _] = self.durations;
        [0.0, g, g + gr, g + gr + r]
    }

    fn wrap(&self, t: f64) -> f64 {
        let cycle = self.cycle_time();
        if cycle > 0.0 {
            t.rem_euclid(cycle)
        } else {
            0.0
        }
    }

    /// Advances the light's timing by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.elapsed = self.wrap(self.elapsed + dt);
    }

    /// The current phase and the time elapsed within it.
    pub fn phase(&self) -> (LightStatus, f64) {
        let starts = self.phase_starts();
        let idx = (0..4)
            .rev()
            .find(|i| self.durations[*i] > 0.0 && self.elapsed >= starts[*i])
            .unwrap_or(0);
        (LightStatus::ALL[idx], self.elapsed - starts[idx])
    }

    /// The current phase.
    pub fn status(&self) -> LightStatus {
        self.phase().0
    }

    pub fn is_red(&self) -> bool {
        self.status() == LightStatus::Red
    }

    /// The time until the light next turns red, or zero if it is red.
    pub fn time_to_next_red(&self) -> f64 {
        self.time_to_phase(LightStatus::Red)
    }

    /// The time until the light next turns green, or zero if it is green.
    pub fn time_to_next_green(&self) -> f64 {
        self.time_to_phase(LightStatus::Green)
    }

    fn time_to_phase(&self, status: LightStatus) -> f64 {
        if self.status() == status {
            return 0.0;
        }
        let idx = LightStatus::ALL.iter().position(|s| *s == status).unwrap_or(0);
        let start = self.phase_starts()[idx];
        if start > self.elapsed {
            start - self.elapsed
        } else {
            self.cycle_time() - self.elapsed + start
        }
    }
}
