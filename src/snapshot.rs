//! Read-only views of the simulation state, for output writers and other observers.

use crate::{LightStatus, RoadSegmentId, TrafficLightId, VehicleId};
use serde::Serialize;

/// The state of one vehicle.
#[derive(Clone, Debug, Serialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    /// The sequence number, in order of creation.
    pub seq: u64,
    /// The label of the vehicle's prototype.
    pub label: String,
    /// The acceleration model category.
    pub model: &'static str,
    pub lane: usize,
    /// The position of the front of the vehicle, in m.
    pub pos: f64,
    /// The speed in m/s.
    pub vel: f64,
    /// The acceleration in m/s<sup>2</sup>.
    pub acc: f64,
    /// The lateral offset from the lane centre in m, during a lane change.
    pub lateral_offset: f64,
    /// The lateral speed in m/s, during a lane change.
    pub lateral_speed: f64,
    /// The world coordinates of the front of the vehicle.
    pub coords: [f64; 2],
    pub is_obstacle: bool,
}

/// The vehicles on one lane, the downstream-most first.
#[derive(Clone, Debug, Serialize)]
pub struct LaneSnapshot {
    pub segment: RoadSegmentId,
    pub segment_name: String,
    pub lane: usize,
    pub vehicles: Vec<VehicleSnapshot>,
}

/// The state of a traffic light.
#[derive(Clone, Debug, Serialize)]
pub struct LightSnapshot {
    pub id: TrafficLightId,
    pub segment: RoadSegmentId,
    pub pos: f64,
    pub status: LightStatus,
    pub time_to_next_red: f64,
    pub time_to_next_green: f64,
}

/// The counters of a source.
#[derive(Clone, Debug, Serialize)]
pub struct SourceSnapshot {
    pub segment: RoadSegmentId,
    pub segment_name: String,
    /// The number of vehicles inserted so far.
    pub inserted: usize,
    /// The number of vehicles waiting to be inserted.
    pub queue_len: usize,
    /// The measured inflow in veh/h.
    pub inflow_rate: f64,
}

/// The counters of a sink.
#[derive(Clone, Debug, Serialize)]
pub struct SinkSnapshot {
    pub segment: RoadSegmentId,
    pub segment_name: String,
    pub implicit: bool,
    /// The number of vehicles removed so far.
    pub count: usize,
    /// The total distance travelled by the removed vehicles, in m.
    pub total_distance: f64,
    /// The total time spent in the network by the removed vehicles, in s.
    pub total_time: f64,
    /// The measured outflow in veh/h.
    pub outflow_rate: f64,
}

/// The state of the whole simulation at the end of a tick.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationSnapshot {
    /// The simulation time in s.
    pub time: f64,
    /// The number of ticks simulated.
    pub frame: usize,
    pub lanes: Vec<LaneSnapshot>,
    pub lights: Vec<LightSnapshot>,
    pub sources: Vec<SourceSnapshot>,
    pub sinks: Vec<SinkSnapshot>,
}

impl SimulationSnapshot {
    /// Iterates over all the vehicles in the snapshot.
    pub fn vehicles(&self) -> impl Iterator<Item = &VehicleSnapshot> {
        self.lanes.iter().flat_map(|lane| lane.vehicles.iter())
    }

    /// The total number of vehicles removed by all sinks.
    pub fn removed(&self) -> usize {
        self.sinks.iter().map(|s| s.count).sum()
    }
}

/// Receives snapshots of the simulation at a fixed sampling interval.
pub trait SimObserver {
    fn observe(&mut self, snapshot: &SimulationSnapshot);
}

impl<F: FnMut(&SimulationSnapshot)> SimObserver for F {
    fn observe(&mut self, snapshot: &SimulationSnapshot) {
        self(snapshot)
    }
}

/// An observer registered with a simulation.
pub(crate) struct Subscription {
    /// The sampling interval in s.
    pub interval: f64,
    /// The simulation time at which the observer is next due.
    pub next_due: f64,
    pub observer: Box<dyn SimObserver>,
}
