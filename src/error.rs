//! Error types of the simulation kernel.

use crate::{RoadSegmentId, VehicleId};
use thiserror::Error;

/// An error in the structure of a road network, detected while it is built.
/// These are never recoverable by the kernel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopologyError {
    #[error("road '{0}' is not defined")]
    UnknownRoad(String),

    #[error("road '{road}' has no lane with id {lane}")]
    UnknownLane { road: String, lane: i32 },

    #[error("lane {lane} is out of range for a segment with {lanes} lanes")]
    LaneOutOfRange { lane: usize, lanes: usize },

    #[error("segment {0:?} does not exist")]
    UnknownSegment(RoadSegmentId),

    #[error("lanes {from} of '{road_a}' and {to} of '{road_b}' do not flow in a consistent direction")]
    InconsistentDirection {
        road_a: String,
        from: i32,
        road_b: String,
        to: i32,
    },

    #[error("lane {lane} of segment '{segment}' already has a {end} link")]
    DuplicateLink {
        segment: String,
        lane: usize,
        end: &'static str,
    },

    #[error("road '{0}' has no lanes")]
    EmptyRoad(String),

    #[error("road '{0}' has a non-positive length")]
    InvalidLength(String),

    #[error("road '{0}' is defined more than once")]
    DuplicateRoad(String),
}

/// A detected inconsistency in the vehicle state of the network.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyViolation {
    /// Two vehicles occupy the same position in a lane.
    SharedPosition {
        segment: RoadSegmentId,
        lane: usize,
        pos: f64,
    },
    /// A vehicle overlaps the vehicle in front of it.
    NegativeGap {
        segment: RoadSegmentId,
        lane: usize,
        leader: VehicleId,
        follower: VehicleId,
        gap: f64,
    },
    /// The position ordering of a lane changed during integration,
    /// meaning a vehicle drove through another.
    OrderChanged { segment: RoadSegmentId, lane: usize },
}

impl std::fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedPosition { segment, lane, pos } => write!(
                f,
                "two vehicles share position {pos:.3} on lane {lane} of {segment:?}"
            ),
            Self::NegativeGap {
                segment,
                lane,
                leader,
                follower,
                gap,
            } => write!(
                f,
                "{follower:?} overlaps {leader:?} by {:.3} m on lane {lane} of {segment:?}",
                -gap
            ),
            Self::OrderChanged { segment, lane } => {
                write!(f, "vehicle ordering changed on lane {lane} of {segment:?}")
            }
        }
    }
}

/// An error raised while running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("{} consistency violation(s), first: {}", .0.len(), .0[0])]
    Consistency(Vec<ConsistencyViolation>),

    #[error("invalid timestep {0}; must be positive and finite")]
    InvalidTimestep(f64),

    #[error("unknown road segment '{0}'")]
    UnknownSegment(String),

    #[error("unknown vehicle prototype '{0}'")]
    UnknownPrototype(String),

    #[error("no route from '{from}' to '{to}'")]
    NoRoute { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),
}
