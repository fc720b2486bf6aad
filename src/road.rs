//! Road segments and their lanes.

pub use lane::{LaneSegment, LaneType};
pub use mapping::{RoadMapping, DEFAULT_LANE_WIDTH};
pub use speed_limit::SpeedLimits;

use crate::math::Point2d;
use crate::sink::TrafficSink;
use crate::source::TrafficSource;
use crate::{RoadSegmentId, TrafficLightId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod lane;
mod mapping;
mod speed_limit;

/// A road segment: a fixed length of road with a fixed number of lanes,
/// all carrying traffic in the same direction.
#[derive(Clone, Debug)]
pub struct RoadSegment {
    /// The segment ID.
    id: RoadSegmentId,
    /// The unique name of the segment.
    name: String,
    /// The length in m.
    length: f64,
    /// The lanes, ordered left to right.
    lanes: Vec<LaneSegment>,
    /// The geometry of the segment.
    mapping: RoadMapping,
    /// The traffic lights along the segment.
    lights: SmallVec<[TrafficLightId; 2]>,
    /// The source feeding vehicles into the upstream end, if any.
    source: Option<TrafficSource>,
    /// The sink absorbing vehicles at the downstream end, if any.
    sink: Option<TrafficSink>,
}

/// The attributes of a road segment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadSegmentAttributes {
    /// The unique name of the segment.
    pub name: String,
    /// The length in m.
    pub length: f64,
    /// The number of lanes.
    pub lanes: usize,
    /// The types of the lanes, left to right. Missing entries are [LaneType::Traffic].
    pub lane_types: Vec<LaneType>,
    /// The speed limits applied to every lane.
    pub speed_limits: SpeedLimits,
    /// The geometry of the segment. Defaults to a straight line along the x axis.
    pub mapping: Option<RoadMapping>,
}

impl RoadSegment {
    pub(crate) fn new(id: RoadSegmentId, attribs: &RoadSegmentAttributes) -> Self {
        let lanes = (0..attribs.lanes)
            .map(|idx| {
                let lane_type = attribs.lane_types.get(idx).copied().unwrap_or_default();
                LaneSegment::new(lane_type, attribs.speed_limits.clone())
            })
            .collect();
        let mapping = attribs.mapping.clone().unwrap_or_else(|| {
            RoadMapping::straight(Point2d::new(0.0, 0.0), 0.0, attribs.length)
        });
        Self {
            id,
            name: attribs.name.clone(),
            length: attribs.length,
            lanes,
            mapping,
            lights: SmallVec::new(),
            source: None,
            sink: None,
        }
    }

    /// Gets the segment's ID.
    pub fn id(&self) -> RoadSegmentId {
        self.id
    }

    /// Gets the segment's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The lanes of the segment, ordered left to right.
    pub fn lanes(&self) -> &[LaneSegment] {
        &self.lanes
    }

    /// Gets a lane of the segment.
    pub fn lane(&self, idx: usize) -> Option<&LaneSegment> {
        self.lanes.get(idx)
    }

    /// The number of lanes.
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// The geometry of the segment.
    pub fn mapping(&self) -> &RoadMapping {
        &self.mapping
    }

    /// The traffic lights along the segment.
    pub fn lights(&self) -> &[TrafficLightId] {
        &self.lights
    }

    pub fn source(&self) -> Option<&TrafficSource> {
        self.source.as_ref()
    }

    pub fn sink(&self) -> Option<&TrafficSink> {
        self.sink.as_ref()
    }

    /// The speed limit in force on a lane at a position, in m/s.
    pub fn speed_limit_at(&self, lane: usize, pos: f64) -> f64 {
        self.lanes
            .get(lane)
            .map_or(f64::INFINITY, |l| l.speed_limits().limit_at(pos))
    }

    /// The highest speed limit on any lane of the segment, in m/s.
    pub fn max_speed_limit(&self) -> f64 {
        self.lanes
            .iter()
            .map(|l| l.speed_limits().max())
            .fold(0.0, f64::max)
    }

    /// Maps a position on a lane to world coordinates.
    pub fn world_coords(&self, lane: usize, pos: f64, lateral: f64) -> Point2d {
        let s = pos * self.mapping.length() / self.length;
        self.mapping.world_coords(s, lane, self.lanes.len(), lateral)
    }

    pub(crate) fn lane_mut(&mut self, idx: usize) -> Option<&mut LaneSegment> {
        self.lanes.get_mut(idx)
    }

    pub(crate) fn add_light(&mut self, light: TrafficLightId) {
        self.lights.push(light);
    }

    pub(crate) fn set_source(&mut self, source: TrafficSource) {
        self.source = Some(source);
    }

    /// Temporarily detaches the source so it can operate on the network.
    pub(crate) fn take_source(&mut self) -> Option<TrafficSource> {
        self.source.take()
    }

    pub(crate) fn sink_mut(&mut self) -> Option<&mut TrafficSink> {
        self.sink.as_mut()
    }

    pub(crate) fn set_sink(&mut self, sink: TrafficSink) {
        self.sink = Some(sink);
    }

    /// Whether any lane ends without a downstream link.
    pub(crate) fn has_open_end(&self) -> bool {
        self.lanes.iter().any(|l| l.downstream().is_none())
    }

    /// Gets the segment's sink, attaching an implicit one if there is none.
    pub(crate) fn sink_or_default(&mut self) -> &mut TrafficSink {
        if self.sink.is_none() {
            log::debug!("attaching default sink to segment '{}'", self.name);
        }
        self.sink.get_or_insert_with(TrafficSink::implicit)
    }
}
