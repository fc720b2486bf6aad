//! The road network: road segments joined by lane-to-lane links.

use crate::road::{LaneSegment, RoadSegment, RoadSegmentAttributes};
use crate::{RoadSegmentId, SegmentSet, TopologyError, Vehicle, VehicleId, VehicleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod topology;

/// A reference to one lane of a road segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaneRef {
    pub segment: RoadSegmentId,
    pub lane: usize,
}

impl LaneRef {
    pub fn new(segment: RoadSegmentId, lane: usize) -> Self {
        Self { segment, lane }
    }
}

/// A directed connection from the downstream end of one lane
/// to the upstream end of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: LaneRef,
    pub to: LaneRef,
}

/// A nearby vehicle, located in the frame of the segment the query was made from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Neighbour {
    pub id: VehicleId,
    /// The position of the front of the vehicle.
    pub pos: f64,
}

impl Neighbour {
    /// The position of the rear of the vehicle.
    pub fn rear(&self, vehicles: &VehicleSet) -> f64 {
        self.pos - vehicles[self.id].effective_length()
    }
}

/// A network of road segments.
#[derive(Clone, Debug, Default)]
pub struct RoadNetwork {
    /// The road segments.
    segments: SegmentSet,
    /// The segment IDs by name.
    names: HashMap<String, RoadSegmentId>,
    /// The links between lanes, in the order they were added.
    links: Vec<Link>,
}

impl RoadNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a road segment to the network.
    pub fn add_segment(
        &mut self,
        attribs: &RoadSegmentAttributes,
    ) -> Result<RoadSegmentId, TopologyError> {
        if self.names.contains_key(&attribs.name) {
            return Err(TopologyError::DuplicateRoad(attribs.name.clone()));
        }
        if attribs.lanes == 0 {
            return Err(TopologyError::EmptyRoad(attribs.name.clone()));
        }
        if !(attribs.length > 0.0 && attribs.length.is_finite()) {
            return Err(TopologyError::InvalidLength(attribs.name.clone()));
        }
        let id = self
            .segments
            .insert_with_key(|id| RoadSegment::new(id, attribs));
        self.names.insert(attribs.name.clone(), id);
        Ok(id)
    }

    /// Specifies that vehicles leaving the end of lane `from` continue in lane `to`.
    /// Each lane end may have at most one link.
    pub fn add_link(&mut self, from: LaneRef, to: LaneRef) -> Result<(), TopologyError> {
        let from_lane = self.lane_checked(from)?;
        if from_lane.downstream().is_some() {
            return Err(self.duplicate_link(from, "downstream"));
        }
        let to_lane = self.lane_checked(to)?;
        if to_lane.upstream().is_some() {
            return Err(self.duplicate_link(to, "upstream"));
        }

        if let Some(lane) = self.lane_mut(from) {
            lane.set_downstream(to);
        }
        if let Some(lane) = self.lane_mut(to) {
            lane.set_upstream(from);
        }
        self.links.push(Link { from, to });
        Ok(())
    }

    /// Gets a road segment.
    pub fn segment(&self, id: RoadSegmentId) -> Option<&RoadSegment> {
        self.segments.get(id)
    }

    /// Looks up a road segment by name.
    pub fn segment_id(&self, name: &str) -> Option<RoadSegmentId> {
        self.names.get(name).copied()
    }

    /// Iterates over the road segments.
    pub fn segments(&self) -> impl Iterator<Item = &RoadSegment> {
        self.segments.values()
    }

    /// The IDs of the road segments.
    pub fn segment_ids(&self) -> impl Iterator<Item = RoadSegmentId> + '_ {
        self.segments.keys()
    }

    /// The number of road segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// The links between lanes.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Gets a lane.
    pub fn lane(&self, lane: LaneRef) -> Option<&LaneSegment> {
        self.segments.get(lane.segment)?.lane(lane.lane)
    }

    pub(crate) fn segment_mut(&mut self, id: RoadSegmentId) -> Option<&mut RoadSegment> {
        self.segments.get_mut(id)
    }

    pub(crate) fn lane_mut(&mut self, lane: LaneRef) -> Option<&mut LaneSegment> {
        self.segments.get_mut(lane.segment)?.lane_mut(lane.lane)
    }

    /// Gets a lane, or an error describing why it does not exist.
    fn lane_checked(&self, lane: LaneRef) -> Result<&LaneSegment, TopologyError> {
        let segment = self
            .segments
            .get(lane.segment)
            .ok_or(TopologyError::UnknownSegment(lane.segment))?;
        segment.lane(lane.lane).ok_or(TopologyError::LaneOutOfRange {
            lane: lane.lane,
            lanes: segment.num_lanes(),
        })
    }

    fn duplicate_link(&self, lane: LaneRef, end: &'static str) -> TopologyError {
        TopologyError::DuplicateLink {
            segment: self.segments[lane.segment].name().to_string(),
            lane: lane.lane,
            end,
        }
    }

    /// The position of a vehicle's lane in the network.
    fn lane_of(vehicle: &Vehicle) -> LaneRef {
        LaneRef::new(vehicle.segment(), vehicle.lane())
    }

    /// Finds the vehicle ahead of `vehicle` in its lane, looking at most one link downstream.
    pub(crate) fn leader(&self, vehicles: &VehicleSet, vehicle: &Vehicle) -> Option<Neighbour> {
        let lane = self.lane(Self::lane_of(vehicle))?;
        match lane.index_of(vehicle.id())? {
            0 => self.leader_downstream(vehicles, lane, vehicle.segment()),
            idx => Some(self.local(vehicles, lane.vehicles()[idx - 1])),
        }
    }

    /// Finds the vehicle behind `vehicle` in its lane, looking at most one link upstream.
    pub(crate) fn follower(&self, vehicles: &VehicleSet, vehicle: &Vehicle) -> Option<Neighbour> {
        let lane = self.lane(Self::lane_of(vehicle))?;
        let idx = lane.index_of(vehicle.id())?;
        match lane.vehicles().get(idx + 1) {
            Some(id) => Some(self.local(vehicles, *id)),
            None => self.follower_upstream(vehicles, lane),
        }
    }

    /// Finds the vehicles which would lead and follow a vehicle at `pos` on `lane`,
    /// looking at most one link beyond the lane at either end.
    pub(crate) fn around(
        &self,
        vehicles: &VehicleSet,
        lane_ref: LaneRef,
        pos: f64,
    ) -> (Option<Neighbour>, Option<Neighbour>) {
        let lane = match self.lane(lane_ref) {
            Some(lane) => lane,
            None => return (None, None),
        };
        let (leader, follower) = lane.around(vehicles, pos);
        let leader = match leader {
            Some(id) => Some(self.local(vehicles, id)),
            None => self.leader_downstream(vehicles, lane, lane_ref.segment),
        };
        let follower = match follower {
            Some(id) => Some(self.local(vehicles, id)),
            None => self.follower_upstream(vehicles, lane),
        };
        (leader, follower)
    }

    fn local(&self, vehicles: &VehicleSet, id: VehicleId) -> Neighbour {
        Neighbour {
            id,
            pos: vehicles[id].pos(),
        }
    }

    /// The last vehicle on the lane downstream of `lane`, in the frame of `segment`.
    fn leader_downstream(
        &self,
        vehicles: &VehicleSet,
        lane: &LaneSegment,
        segment: RoadSegmentId,
    ) -> Option<Neighbour> {
        let next = lane.downstream()?;
        let id = self.lane(next)?.last()?;
        let offset = self.segments.get(segment)?.length();
        Some(Neighbour {
            id,
            pos: vehicles[id].pos() + offset,
        })
    }

    /// The first vehicle on the lane upstream of `lane`, in the frame of `lane`.
    fn follower_upstream(&self, vehicles: &VehicleSet, lane: &LaneSegment) -> Option<Neighbour> {
        let prev = lane.upstream()?;
        let id = self.lane(prev)?.first()?;
        let offset = self.segments.get(prev.segment)?.length();
        Some(Neighbour {
            id,
            pos: vehicles[id].pos() - offset,
        })
    }
}
