use super::SpeedLimits;
use crate::{LaneRef, VehicleId, VehicleSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The role of a lane within its road segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneType {
    /// A regular lane.
    #[default]
    Traffic,
    /// An acceleration lane which ends at the end of the segment.
    /// Vehicles must merge out of it before reaching its end.
    Entrance,
    /// A deceleration lane, only entered by vehicles whose route requires it.
    Exit,
}

/// A single lane of a road segment, holding the vehicles which occupy it.
#[derive(Clone, Debug)]
pub struct LaneSegment {
    /// The role of the lane.
    lane_type: LaneType,
    /// The speed limits along the lane.
    speed_limits: SpeedLimits,
    /// The lane which vehicles arrive from, if any.
    upstream: Option<LaneRef>,
    /// The lane which vehicles continue into at the end of the segment, if any.
    downstream: Option<LaneRef>,
    /// The vehicles on the lane, the downstream-most vehicle first.
    vehicles: Vec<VehicleId>,
}

impl LaneSegment {
    pub(crate) fn new(lane_type: LaneType, speed_limits: SpeedLimits) -> Self {
        Self {
            lane_type,
            speed_limits,
            upstream: None,
            downstream: None,
            vehicles: vec![],
        }
    }

    pub fn lane_type(&self) -> LaneType {
        self.lane_type
    }

    /// The speed limits along the lane.
    pub fn speed_limits(&self) -> &SpeedLimits {
        &self.speed_limits
    }

    /// The lane which vehicles arrive from, if any.
    pub fn upstream(&self) -> Option<LaneRef> {
        self.upstream
    }

    /// The lane which vehicles continue into, if any.
    pub fn downstream(&self) -> Option<LaneRef> {
        self.downstream
    }

    /// The vehicles on the lane, the downstream-most vehicle first.
    pub fn vehicles(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// The number of vehicles on the lane.
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// The downstream-most vehicle on the lane.
    pub fn first(&self) -> Option<VehicleId> {
        self.vehicles.first().copied()
    }

    /// The upstream-most vehicle on the lane.
    pub fn last(&self) -> Option<VehicleId> {
        self.vehicles.last().copied()
    }

    /// The index of a vehicle within the lane.
    pub fn index_of(&self, id: VehicleId) -> Option<usize> {
        self.vehicles.iter().position(|v| *v == id)
    }

    /// Finds the vehicles either side of a longitudinal position: the upstream-most
    /// vehicle whose front is beyond `pos` and the downstream-most one whose front is not.
    pub(crate) fn around(&self, vehicles: &VehicleSet, pos: f64) -> (Option<VehicleId>, Option<VehicleId>) {
        let idx = self.vehicles.partition_point(|id| vehicles[*id].pos() > pos);
        let leader = idx.checked_sub(1).map(|i| self.vehicles[i]);
        let follower = self.vehicles.get(idx).copied();
        (leader, follower)
    }

    pub(crate) fn set_upstream(&mut self, lane: LaneRef) {
        self.upstream = Some(lane);
    }

    pub(crate) fn set_downstream(&mut self, lane: LaneRef) {
        self.downstream = Some(lane);
    }

    pub(crate) fn set_speed_limits(&mut self, speed_limits: SpeedLimits) {
        self.speed_limits = speed_limits;
    }

    /// Inserts a vehicle, keeping the lane sorted.
    pub(crate) fn insert(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        let pos = vehicles[id].pos();
        let idx = self
            .vehicles
            .iter()
            .position(|v| vehicles[*v].pos() < pos)
            .unwrap_or(self.vehicles.len());
        self.vehicles.insert(idx, id);
    }

    /// Removes a vehicle from the lane. Returns `false` if it was not on the lane.
    pub(crate) fn remove(&mut self, id: VehicleId) -> bool {
        match self.vehicles.iter().rposition(|v| *v == id) {
            Some(idx) => {
                self.vehicles.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the downstream-most vehicles for which `pred` holds.
    pub(crate) fn drain_front(&mut self, mut pred: impl FnMut(VehicleId) -> bool) -> Vec<VehicleId> {
        let count = self.vehicles.iter().take_while(|id| pred(**id)).count();
        self.vehicles.drain(..count).collect()
    }

    /// Whether the vehicles are ordered by position, downstream-most first.
    pub(crate) fn is_sorted(&self, vehicles: &VehicleSet) -> bool {
        self.vehicles
            .iter()
            .map(|id| vehicles[*id].pos())
            .tuple_windows()
            .all(|(a, b)| a >= b)
    }

    /// Re-establishes the position ordering of the vehicles.
    /// Returns `true` if the ordering had changed.
    pub(crate) fn sort(&mut self, vehicles: &VehicleSet) -> bool {
        if self.is_sorted(vehicles) {
            return false;
        }
        self.vehicles
            .sort_by(|a, b| vehicles[*b].pos().total_cmp(&vehicles[*a].pos()));
        true
    }
}
