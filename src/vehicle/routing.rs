use crate::road::RoadSegment;
use crate::{RoadNetwork, RoadSegmentId};
use itertools::Itertools;
use smallvec::SmallVec;

/// The speed assumed on segments without a speed limit, in m/s.
const UNLIMITED_ROUTING_SPEED: f64 = 36.0; // m/s

/// The sequence of road segments a vehicle intends to travel along.
/// This can be conceptualised as the vehicle's GPS navigation unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Route {
    /// The segments, starting with the one the route was planned from.
    segments: Vec<RoadSegmentId>,
    /// The index of the segment the vehicle is currently on.
    idx: usize,
}

impl Route {
    /// Creates a route from a non-empty list of segments.
    pub fn new(segments: Vec<RoadSegmentId>) -> Self {
        Self { segments, idx: 0 }
    }

    /// The segments still to be travelled, including the current one.
    pub fn remaining(&self) -> &[RoadSegmentId] {
        &self.segments[self.idx.min(self.segments.len())..]
    }

    /// The segment after the current one, if there is one.
    pub fn next(&self) -> Option<RoadSegmentId> {
        self.segments.get(self.idx + 1).copied()
    }

    /// Whether the vehicle is on the final segment of its route.
    pub fn is_complete(&self) -> bool {
        self.idx + 1 >= self.segments.len()
    }

    /// Moves along the route onto `segment`.
    /// Returns `false` if `segment` is not the next segment on the route.
    pub fn advance(&mut self, segment: RoadSegmentId) -> bool {
        if self.next() == Some(segment) {
            self.idx += 1;
            true
        } else {
            false
        }
    }
}

/// Finds the fastest route from one segment to another, if one exists.
pub(crate) fn find_route(
    network: &RoadNetwork,
    from: RoadSegmentId,
    to: RoadSegmentId,
) -> Option<Route> {
    network.segment(from)?;
    let result = pathfinding::directed::dijkstra::dijkstra(
        &from,
        |id| successors(*id, network),
        |id| *id == to,
    );
    result.map(|(segments, _)| Route::new(segments))
}

/// The segments reachable from the end of a segment, along with
/// the cost of traversing the segment.
fn successors(id: RoadSegmentId, network: &RoadNetwork) -> Vec<(RoadSegmentId, usize)> {
    let segment = match network.segment(id) {
        Some(segment) => segment,
        None => return vec![],
    };
    let speed = match segment.max_speed_limit() {
        limit if limit.is_finite() && limit > 0.0 => limit,
        _ => UNLIMITED_ROUTING_SPEED,
    };
    let cost = (10. * segment.length() / speed) as usize;
    segment
        .lanes()
        .iter()
        .flat_map(|lane| lane.downstream())
        .map(|lane_ref| lane_ref.segment)
        .unique()
        .map(|next| (next, cost.max(1)))
        .collect()
}

/// The lanes of `segment` whose downstream link leads onto `next`.
pub(crate) fn lanes_towards(segment: &RoadSegment, next: RoadSegmentId) -> SmallVec<[usize; 4]> {
    segment
        .lanes()
        .iter()
        .enumerate()
        .filter(|(_, lane)| lane.downstream().map(|r| r.segment) == Some(next))
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{LaneRef, RoadSegmentAttributes};

    fn straight(network: &mut RoadNetwork, name: &str, length: f64, lanes: usize) -> RoadSegmentId {
        network
            .add_segment(&RoadSegmentAttributes {
                name: name.into(),
                length,
                lanes,
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn follows_lane_links() {
        let mut network = RoadNetwork::new();
        let a = straight(&mut network, "a", 100.0, 2);
        let b = straight(&mut network, "b", 100.0, 1);
        let c = straight(&mut network, "c", 500.0, 1);
        let d = straight(&mut network, "d", 100.0, 1);
        network.add_link(LaneRef::new(a, 0), LaneRef::new(b, 0)).unwrap();
        network.add_link(LaneRef::new(a, 1), LaneRef::new(c, 0)).unwrap();
        network.add_link(LaneRef::new(b, 0), LaneRef::new(d, 0)).unwrap();
        network.add_link(LaneRef::new(c, 0), LaneRef::new(d, 0)).unwrap_err();

        let route = find_route(&network, a, d).unwrap();
        assert_eq!(route.remaining(), &[a, b, d]);
        assert!(find_route(&network, d, a).is_none());

        let lanes = lanes_towards(network.segment(a).unwrap(), c);
        assert_eq!(lanes.as_slice(), &[1]);
    }

    #[test]
    fn advancing() {
        let mut network = RoadNetwork::new();
        let a = straight(&mut network, "a", 100.0, 1);
        let b = straight(&mut network, "b", 100.0, 1);
        let mut route = Route::new(vec![a, b]);
        assert_eq!(route.next(), Some(b));
        assert!(!route.advance(a));
        assert!(route.advance(b));
        assert!(route.is_complete());
        assert_eq!(route.remaining(), &[b]);
    }
}
