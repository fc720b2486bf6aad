//! Raw road topology facts, and their resolution into a [RoadNetwork].
//!
//! Roads carry traffic in both directions. Lanes to the right of a road's
//! reference line have negative ids (`-1` being nearest the reference line)
//! and carry traffic from the road's start to its end; lanes to the left have
//! positive ids and carry traffic from its end to its start. Each direction
//! of a road becomes one [RoadSegment](crate::RoadSegment): the right-hand one
//! is named after the road, the left-hand one is suffixed with [`REVERSE_SUFFIX`].

use super::{LaneRef, RoadNetwork};
use crate::math::Point2d;
use crate::road::{LaneType, RoadMapping, RoadSegmentAttributes, SpeedLimits, DEFAULT_LANE_WIDTH};
use crate::sink::TrafficSink;
use crate::{RoadSegmentId, TopologyError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The suffix added to the name of a road to name its left-hand segment.
pub const REVERSE_SUFFIX: &str = ":reverse";

/// An end of a road.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPoint {
    Start,
    End,
}

/// A road of the input topology.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadDefinition {
    /// The unique name of the road.
    pub name: String,
    /// The length in m.
    pub length: f64,
    /// The number of lanes right of the reference line (ids `-1..=-n`).
    pub right_lanes: usize,
    /// The number of lanes left of the reference line (ids `1..=n`).
    pub left_lanes: usize,
    /// The types of individual lanes, by lane id. Unlisted lanes are [LaneType::Traffic].
    pub lane_types: BTreeMap<i32, LaneType>,
    /// The speed limits applied to every lane, measured in each lane's direction of travel.
    pub speed_limits: SpeedLimits,
    /// The reference line of the road. Defaults to a straight line along the x axis.
    pub geometry: Vec<Point2d>,
    /// The lane width in m.
    pub lane_width: Option<f64>,
}

/// A direct connection between the ends of two roads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoadConnection {
    pub road_a: String,
    pub end_a: ContactPoint,
    pub road_b: String,
    pub end_b: ContactPoint,
    /// Pairs of `(lane of road_a, lane of road_b)` which connect. If empty, each lane
    /// of `road_a` connects to the matching lane of `road_b`, if it has one.
    #[serde(default)]
    pub lane_links: Vec<(i32, i32)>,
}

/// A junction, in which connecting roads join incoming roads to outgoing roads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Junction {
    pub name: String,
    pub connections: Vec<JunctionConnection>,
}

/// The connection of one incoming road to one connecting road within a junction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JunctionConnection {
    pub incoming_road: String,
    /// The end of the incoming road which touches the junction.
    pub incoming_end: ContactPoint,
    pub connecting_road: String,
    /// The end of the connecting road which touches the incoming road.
    pub contact_point: ContactPoint,
    /// Pairs of `(incoming lane, connecting lane)`.
    pub lane_links: Vec<(i32, i32)>,
}

/// The raw topology of a road network.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub roads: Vec<RoadDefinition>,
    pub connections: Vec<RoadConnection>,
    pub junctions: Vec<Junction>,
}

/// The segments built for a road.
#[derive(Clone, Copy, Debug)]
struct RoadSegments {
    forward: Option<RoadSegmentId>,
    backward: Option<RoadSegmentId>,
    right_lanes: usize,
    left_lanes: usize,
}

impl RoadSegments {
    /// Resolves a lane id into a lane of one of the road's segments.
    fn lane(&self, road: &str, lane: i32) -> Result<LaneRef, TopologyError> {
        let unknown = || TopologyError::UnknownLane {
            road: road.to_string(),
            lane,
        };
        let idx = lane.unsigned_abs() as usize;
        let (segment, lanes) = match lane {
            l if l < 0 => (self.forward, self.right_lanes),
            l if l > 0 => (self.backward, self.left_lanes),
            _ => return Err(unknown()),
        };
        match segment {
            Some(segment) if idx <= lanes => Ok(LaneRef::new(segment, idx - 1)),
            _ => Err(unknown()),
        }
    }

    /// The lane ids of the road.
    fn lane_ids(&self) -> impl Iterator<Item = i32> {
        let right = (1..=self.right_lanes as i32).map(|k| -k);
        let left = 1..=self.left_lanes as i32;
        right.chain(left)
    }
}

/// Whether traffic in a lane leaves the road at the given end.
fn leaves_at(lane: i32, end: ContactPoint) -> bool {
    match end {
        ContactPoint::End => lane < 0,
        ContactPoint::Start => lane > 0,
    }
}

impl Topology {
    /// Resolves the topology into a road network.
    ///
    /// Every lane end left without a link receives an implicit default sink.
    pub fn build(&self) -> Result<RoadNetwork, TopologyError> {
        let mut network = RoadNetwork::new();
        let mut roads = HashMap::new();

        for road in &self.roads {
            if roads.contains_key(road.name.as_str()) {
                return Err(TopologyError::DuplicateRoad(road.name.clone()));
            }
            let segments = Self::add_road(&mut network, road)?;
            roads.insert(road.name.as_str(), segments);
        }

        let lookup = |name: &str| {
            roads
                .get(name)
                .copied()
                .ok_or_else(|| TopologyError::UnknownRoad(name.to_string()))
        };

        for conn in &self.connections {
            let a = lookup(&conn.road_a)?;
            let b = lookup(&conn.road_b)?;
            let pairs = if conn.lane_links.is_empty() {
                Self::default_lane_pairs(&a, conn.end_a, &b, conn.end_b)
            } else {
                conn.lane_links.clone()
            };
            for (la, lb) in pairs {
                Self::connect(
                    &mut network,
                    (conn.road_a.as_str(), &a, conn.end_a, la),
                    (conn.road_b.as_str(), &b, conn.end_b, lb),
                )?;
            }
        }

        for junction in &self.junctions {
            for conn in &junction.connections {
                let incoming = lookup(&conn.incoming_road)?;
                let connecting = lookup(&conn.connecting_road)?;
                for &(li, lc) in &conn.lane_links {
                    Self::connect(
                        &mut network,
                        (conn.incoming_road.as_str(), &incoming, conn.incoming_end, li),
                        (conn.connecting_road.as_str(), &connecting, conn.contact_point, lc),
                    )?;
                }
            }
        }

        // Open lane ends get a default sink
        let open = network
            .segment_ids()
            .filter(|id| network.segment(*id).map_or(false, |s| s.has_open_end()))
            .collect::<Vec<_>>();
        for id in &open {
            if let Some(segment) = network.segment_mut(*id) {
                segment.set_sink(TrafficSink::implicit());
            }
        }

        log::info!(
            "network built: {} segments, {} links, {} default sinks",
            network.num_segments(),
            network.links().len(),
            open.len()
        );
        Ok(network)
    }

    /// Creates the segments of one road.
    fn add_road(
        network: &mut RoadNetwork,
        road: &RoadDefinition,
    ) -> Result<RoadSegments, TopologyError> {
        if road.right_lanes + road.left_lanes == 0 {
            return Err(TopologyError::EmptyRoad(road.name.clone()));
        }
        let lane_width = road.lane_width.unwrap_or(DEFAULT_LANE_WIDTH);
        let reference = match road.geometry.len() {
            0 | 1 => RoadMapping::straight(
                road.geometry.first().copied().unwrap_or(Point2d::new(0.0, 0.0)),
                0.0,
                road.length,
            ),
            _ => RoadMapping::new(road.geometry.clone(), lane_width),
        }
        .with_lane_width(lane_width);

        let lane_types = |ids: &mut dyn Iterator<Item = i32>| {
            ids.map(|id| road.lane_types.get(&id).copied().unwrap_or_default())
                .collect::<Vec<_>>()
        };

        let forward = if road.right_lanes > 0 {
            let half_width = 0.5 * lane_width * road.right_lanes as f64;
            let attribs = RoadSegmentAttributes {
                name: road.name.clone(),
                length: road.length,
                lanes: road.right_lanes,
                lane_types: lane_types(&mut (1..=road.right_lanes as i32).map(|k| -k)),
                speed_limits: road.speed_limits.clone(),
                mapping: Some(reference.offset(half_width)),
            };
            Some(network.add_segment(&attribs)?)
        } else {
            None
        };

        let backward = if road.left_lanes > 0 {
            let half_width = 0.5 * lane_width * road.left_lanes as f64;
            let attribs = RoadSegmentAttributes {
                name: format!("{}{}", road.name, REVERSE_SUFFIX),
                length: road.length,
                lanes: road.left_lanes,
                lane_types: lane_types(&mut (1..=road.left_lanes as i32)),
                speed_limits: road.speed_limits.clone(),
                mapping: Some(reference.reversed().offset(half_width)),
            };
            Some(network.add_segment(&attribs)?)
        } else {
            None
        };

        Ok(RoadSegments {
            forward,
            backward,
            right_lanes: road.right_lanes,
            left_lanes: road.left_lanes,
        })
    }

    /// Pairs each lane of `a` with the lane of `b` it continues into,
    /// accounting for the direction flip when two starts or two ends meet.
    fn default_lane_pairs(
        a: &RoadSegments,
        end_a: ContactPoint,
        b: &RoadSegments,
        end_b: ContactPoint,
    ) -> Vec<(i32, i32)> {
        let flip = if end_a == end_b { -1 } else { 1 };
        let b_ids = b.lane_ids().collect::<Vec<_>>();
        a.lane_ids()
            .map(|id| (id, flip * id))
            .filter(|(_, lb)| b_ids.contains(lb))
            .collect()
    }

    /// Links a lane of one road to a lane of another, in whichever direction
    /// traffic flows between them.
    fn connect(
        network: &mut RoadNetwork,
        (name_a, a, end_a, la): (&str, &RoadSegments, ContactPoint, i32),
        (name_b, b, end_b, lb): (&str, &RoadSegments, ContactPoint, i32),
    ) -> Result<(), TopologyError> {
        let lane_a = a.lane(name_a, la)?;
        let lane_b = b.lane(name_b, lb)?;
        match (leaves_at(la, end_a), leaves_at(lb, end_b)) {
            (true, false) => network.add_link(lane_a, lane_b),
            (false, true) => network.add_link(lane_b, lane_a),
            _ => Err(TopologyError::InconsistentDirection {
                road_a: name_a.to_string(),
                from: la,
                road_b: name_b.to_string(),
                to: lb,
            }),
        }
    }
}
