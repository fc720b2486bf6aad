//! A microscopic road traffic simulation kernel.
//!
//! Vehicles travel along lane-discretised [RoadSegment]s which are joined
//! together by lane-to-lane [Link]s. Each tick, every vehicle evaluates its
//! car-following [AccelerationModel], considers changing lanes using MOBIL,
//! and is integrated forward in time. [TrafficSource]s and [TrafficSink]s form
//! the open boundaries of the network, and [TrafficLight]s impose stops.

pub use cgmath;
pub use error::{ConsistencyViolation, SimError, TopologyError};
pub use light::{LightStatus, TrafficLight};
pub use network::topology::{
    ContactPoint, Junction, JunctionConnection, RoadConnection, RoadDefinition, Topology,
    REVERSE_SUFFIX,
};
pub use network::{LaneRef, Link, RoadNetwork};
pub use road::{
    LaneSegment, LaneType, RoadMapping, RoadSegment, RoadSegmentAttributes, SpeedLimits,
    DEFAULT_LANE_WIDTH,
};
pub use simulation::{ConsistencyPolicy, Simulation, SimulationConfig};
pub use sink::TrafficSink;
pub use slotmap::{Key, KeyData};
pub use snapshot::{
    LaneSnapshot, LightSnapshot, SimObserver, SimulationSnapshot, SinkSnapshot, SourceSnapshot,
    VehicleSnapshot,
};
pub use source::{InflowSample, InflowTimeSeries, ScheduledVehicle, TrafficComposition, TrafficSource};
pub use util::RateMeter;
pub use vehicle::acceleration::{
    AccelerationModel, Gipps, Idm, Kca, Krauss, ModelInput, ModelParams, Nsm, OptimalVelocity,
    OptimalVelocityShape,
};
pub use vehicle::lane_change::{
    AccelerationChange, Direction, LaneChangeConfig, LaneChangeMode, LaneChangeModel, Neighbourhood, Rejection,
};
pub use vehicle::{Vehicle, VehicleKind, VehiclePrototype};

pub mod config;
mod error;
mod light;
pub mod math;
mod network;
mod road;
mod simulation;
mod sink;
mod snapshot;
mod source;
mod util;
mod vehicle;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Unique ID of a [RoadSegment].
    pub struct RoadSegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
}

type SegmentSet = SlotMap<RoadSegmentId, RoadSegment>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
type LightSet = SlotMap<TrafficLightId, TrafficLight>;
