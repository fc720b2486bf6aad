use crate::math::TimeSeries;
use crate::util::{rotated_range, RateMeter};
use crate::SimError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The time gap a continuous-model vehicle must have to its leader to be inserted, in s.
const INSERTION_TIME_GAP: f64 = 1.0; // s

/// One sample of an inflow time series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InflowSample {
    /// The time in s.
    pub time: f64,
    /// The flow rate in veh/h.
    pub flow: f64,
    /// The speed of entering vehicles in m/s.
    pub speed: f64,
}

/// The inflow of a source as a function of time, linearly interpolated between
/// samples and held constant beyond them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<InflowSample>")]
pub struct InflowTimeSeries {
    flow: TimeSeries,
    speed: TimeSeries,
}

impl From<Vec<InflowSample>> for InflowTimeSeries {
    fn from(samples: Vec<InflowSample>) -> Self {
        Self {
            flow: TimeSeries::new(samples.iter().map(|s| (s.time, s.flow.max(0.0))).collect()),
            speed: TimeSeries::new(samples.iter().map(|s| (s.time, s.speed.max(0.0))).collect()),
        }
    }
}

impl InflowTimeSeries {
    /// Creates an inflow time series from samples in any order.
    pub fn new(samples: Vec<InflowSample>) -> Self {
        samples.into()
    }

    /// An inflow which never changes.
    pub fn constant(flow: f64, speed: f64) -> Self {
        Self {
            flow: TimeSeries::constant(flow.max(0.0)),
            speed: TimeSeries::constant(speed.max(0.0)),
        }
    }

    /// The flow rate at time `t`, in veh/h.
    pub fn flow_at(&self, t: f64) -> f64 {
        self.flow.value_at(t)
    }

    /// The entry speed at time `t`, in m/s.
    pub fn speed_at(&self, t: f64) -> f64 {
        self.speed.value_at(t)
    }
}

/// A weighted mix of vehicle prototypes.
#[derive(Clone, Debug)]
pub struct TrafficComposition {
    labels: Vec<String>,
    /// The distribution over `labels`, or `None` if there is only one.
    dist: Option<WeightedIndex<f64>>,
}

impl TrafficComposition {
    /// Creates a composition from `(prototype label, weight)` pairs.
    pub fn new(entries: Vec<(String, f64)>) -> Result<Self, SimError> {
        let dist = WeightedIndex::new(entries.iter().map(|(_, w)| *w))
            .map_err(|e| SimError::Config(format!("invalid traffic composition: {e}")))?;
        Ok(Self {
            labels: entries.into_iter().map(|(label, _)| label).collect(),
            dist: Some(dist),
        })
    }

    /// A composition of a single prototype.
    pub fn single(label: &str) -> Self {
        Self {
            labels: vec![label.to_string()],
            dist: None,
        }
    }

    /// The labels of the prototypes in the mix.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Draws a prototype label.
    pub fn sample(&self, rng: &mut dyn RngCore) -> &str {
        let idx = self.dist.as_ref().map_or(0, |dist| dist.sample(rng));
        &self.labels[idx]
    }
}

/// A vehicle which enters the network at a given time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledVehicle {
    /// The entry time in s.
    pub time: f64,
    /// The label of the vehicle's prototype.
    pub label: String,
    /// The lane to enter on, or any lane if `None`.
    #[serde(default)]
    pub lane: Option<usize>,
    /// The entry speed in m/s. Defaults to the desired speed, within the speed limit.
    #[serde(default)]
    pub speed: Option<f64>,
    /// The name of the segment the vehicle is heading to.
    #[serde(default)]
    pub destination: Option<String>,
}

/// A vehicle waiting to enter the network.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PendingVehicle {
    pub label: String,
    pub lane: Option<usize>,
    pub speed: Option<f64>,
    pub destination: Option<String>,
}

/// How a source generates vehicles.
#[derive(Clone, Debug)]
enum Inflow {
    /// At a rate given by a time series.
    Flow {
        series: InflowTimeSeries,
        composition: TrafficComposition,
        /// The fractional number of vehicles due but not yet queued.
        n_wait: f64,
    },
    /// At explicitly scheduled times, sorted by time.
    Schedule(VecDeque<ScheduledVehicle>),
}

/// Feeds vehicles into the upstream end of a road segment.
#[derive(Clone, Debug)]
pub struct TrafficSource {
    inflow: Inflow,
    /// The vehicles waiting to be inserted, in order.
    queue: VecDeque<PendingVehicle>,
    /// Measures the inflow rate.
    meter: RateMeter,
    /// The lane at which the next search for a gap begins.
    lane_cursor: usize,
}

impl TrafficSource {
    /// Creates a source with a time-varying inflow rate.
    pub fn flow(series: InflowTimeSeries, composition: TrafficComposition) -> Self {
        Self::with_inflow(Inflow::Flow {
            series,
            composition,
            n_wait: 0.0,
        })
    }

    /// Creates a source which inserts vehicles at scheduled times.
    pub fn schedule(mut entries: Vec<ScheduledVehicle>) -> Self {
        entries.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self::with_inflow(Inflow::Schedule(entries.into()))
    }

    fn with_inflow(inflow: Inflow) -> Self {
        Self {
            inflow,
            queue: VecDeque::new(),
            meter: RateMeter::default(),
            lane_cursor: 0,
        }
    }

    /// The number of vehicles waiting to be inserted.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The number of vehicles inserted so far.
    pub fn inserted(&self) -> usize {
        self.meter.total()
    }

    /// The measured inflow in veh/h.
    pub fn inflow_rate(&self) -> f64 {
        self.meter.rate_per_hour()
    }

    /// The prototype labels the source may insert.
    pub fn labels(&self) -> Vec<&str> {
        match &self.inflow {
            Inflow::Flow { composition, .. } => {
                composition.labels().iter().map(|l| l.as_str()).collect()
            }
            Inflow::Schedule(entries) => entries.iter().map(|e| e.label.as_str()).collect(),
        }
    }

    /// The destinations of scheduled vehicles.
    pub(crate) fn destinations(&self) -> Vec<&str> {
        match &self.inflow {
            Inflow::Flow { .. } => vec![],
            Inflow::Schedule(entries) => entries
                .iter()
                .flat_map(|e| e.destination.as_deref())
                .collect(),
        }
    }

    /// The lanes requested by scheduled vehicles.
    pub(crate) fn requested_lanes(&self) -> Vec<usize> {
        match &self.inflow {
            Inflow::Flow { .. } => vec![],
            Inflow::Schedule(entries) => entries.iter().flat_map(|e| e.lane).collect(),
        }
    }

    /// Queues the vehicles due by time `now`.
    pub(crate) fn advance(&mut self, now: f64, dt: f64, rng: &mut dyn RngCore) {
        self.meter.expire(now);
        match &mut self.inflow {
            Inflow::Flow {
                series,
                composition,
                n_wait,
            } => {
                *n_wait += series.flow_at(now) * dt / 3600.0;
                while *n_wait >= 1.0 {
                    *n_wait -= 1.0;
                    self.queue.push_back(PendingVehicle {
                        label: composition.sample(rng).to_string(),
                        lane: None,
                        speed: None,
                        destination: None,
                    });
                }
            }
            Inflow::Schedule(entries) => {
                while entries.front().map_or(false, |e| e.time <= now) {
                    if let Some(entry) = entries.pop_front() {
                        self.queue.push_back(PendingVehicle {
                            label: entry.label,
                            lane: entry.lane,
                            speed: entry.speed,
                            destination: entry.destination,
                        });
                    }
                }
            }
        }
    }

    /// The speed at which vehicles enter at time `now`, if prescribed by the inflow.
    pub(crate) fn entry_speed(&self, now: f64) -> Option<f64> {
        match &self.inflow {
            Inflow::Flow { series, .. } => Some(series.speed_at(now)),
            Inflow::Schedule(_) => None,
        }
    }

    /// The vehicle at the head of the queue.
    pub(crate) fn peek(&self) -> Option<&PendingVehicle> {
        self.queue.front()
    }

    /// Removes the vehicle at the head of the queue, recording its insertion at `now`.
    pub(crate) fn pop_inserted(&mut self, now: f64) -> Option<PendingVehicle> {
        let vehicle = self.queue.pop_front()?;
        self.meter.record(now);
        Some(vehicle)
    }

    /// The order in which lanes are searched for a gap. The starting lane
    /// rotates from tick to tick so that no lane is favoured.
    pub(crate) fn lane_order(&mut self, lanes: usize) -> impl Iterator<Item = usize> {
        let start = self.lane_cursor;
        self.lane_cursor = (self.lane_cursor + 1) % lanes.max(1);
        rotated_range(lanes, start)
    }
}

/// Decides whether a vehicle may be inserted in front of a follower-less position,
/// returning the speed to insert it with if so.
///
/// # Parameters
/// * `gap` - The net gap to the leader, or infinity if there is none
/// * `leader_speed` - The leader's speed, if there is a leader
/// * `speed` - The desired entry speed
/// * `length` - The vehicle's effective length
/// * `cellular_interval` - The update interval of a cellular model, or `None` for continuous models
pub(crate) fn insertion_speed(
    gap: f64,
    leader_speed: Option<f64>,
    speed: f64,
    length: f64,
    cellular_interval: Option<f64>,
) -> Option<f64> {
    let leader_speed = leader_speed.unwrap_or(speed);
    match cellular_interval {
        Some(interval) => {
            let speed = f64::min(speed, leader_speed);
            (gap > speed * interval && gap > 0.0).then_some(speed)
        }
        None => {
            let required = length + speed * INSERTION_TIME_GAP;
            if gap <= required {
                None
            } else if gap < 2.0 * required {
                Some(f64::min(speed, leader_speed))
            } else {
                Some(speed)
            }
        }
    }
}
