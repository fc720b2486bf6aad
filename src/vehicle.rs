use self::acceleration::{AccelerationModel, ModelInput, ModelParams};
use self::lane_change::{LaneChangeModel, LateralTransition};
use self::routing::Route;
use crate::{RoadSegmentId, VehicleId};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub mod acceleration;
pub mod lane_change;
pub(crate) mod routing;

/// The default maximum deceleration of all vehicles in m/s<sup>2</sup>.
const MAX_DECEL: f64 = 9.0; // m/s^2

/// Vehicles slower than this are considered stopped, in m/s.
const STOPPED_SPEED: f64 = 0.1; // m/s

/// Tolerance used when comparing accumulated model clocks, in s.
const CLOCK_EPSILON: f64 = 1e-9; // s

/// The kind of a simulated vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    /// A regular, moving vehicle.
    Regular,
    /// A stationary obstacle, such as the end of a merge lane.
    Obstacle,
}

/// The attributes shared by all vehicles of one type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VehiclePrototype {
    /// The label identifying the vehicle type.
    pub label: String,
    /// The physical length in m.
    pub length: f64,
    /// The length occupied in the lane for the purpose of gaps, in m.
    /// Defaults to the physical length.
    pub effective_length: Option<f64>,
    /// The width in m.
    pub width: f64,
    /// The maximum deceleration, a positive number in m/s<sup>2</sup>.
    pub max_deceleration: f64,
    /// The car-following model.
    pub model: ModelParams,
    /// The lane changing model.
    pub lane_change: LaneChangeModel,
    /// The standard deviation of the desired speed adjustment factor.
    pub speed_stddev: f64,
}

impl Default for VehiclePrototype {
    fn default() -> Self {
        Self {
            label: "car".into(),
            length: 5.0,
            effective_length: None,
            width: 2.0,
            max_deceleration: MAX_DECEL,
            model: ModelParams::default(),
            lane_change: LaneChangeModel::default(),
            speed_stddev: 0.0,
        }
    }
}

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID
    pub(crate) id: VehicleId,
    /// The order in which the vehicle was created.
    seq: u64,
    /// The label of the vehicle's prototype.
    label: String,
    kind: VehicleKind,
    /// The physical length in m.
    length: f64,
    /// The effective length in m.
    eff_len: f64,
    width: f64,
    /// The maximum deceleration in m/s<sup>2</sup>.
    max_dec: f64,
    /// The acceleration model
    model: AccelerationModel,
    /// The lane changing model
    lc_model: LaneChangeModel,
    /// The road segment the vehicle is on.
    segment: RoadSegmentId,
    /// The lane index within the road segment.
    lane: usize,
    /// The position of the front of the vehicle along its segment, in m.
    pos: f64,
    /// The position at the end of the previous step, in the current segment's frame.
    prev_pos: f64,
    /// The velocity in m/s.
    vel: f64,
    /// The acceleration in m/s<sup>2</sup>.
    acc: f64,
    /// The time since the acceleration model was last evaluated,
    /// or `None` if it never has been.
    since_update: Option<f64>,
    /// Whether a cellular model update is due in this step.
    jump_pending: bool,
    /// The in-progress lane change, if there is one.
    lane_change: Option<LateralTransition>,
    /// The cooldown applied once the in-progress lane change completes, in s.
    pending_cooldown: f64,
    /// The time remaining before the vehicle may change lanes, in s.
    cooldown: f64,
    /// The distance travelled in m.
    distance: f64,
    /// The time spent in the network in s.
    travel_time: f64,
    /// The route the vehicle follows, if any.
    route: Option<Route>,
}

impl Vehicle {
    /// Creates a new vehicle from a prototype.
    pub(crate) fn new(id: VehicleId, seq: u64, prototype: &VehiclePrototype) -> Self {
        Self {
            id,
            seq,
            label: prototype.label.clone(),
            kind: VehicleKind::Regular,
            length: prototype.length,
            eff_len: prototype.effective_length.unwrap_or(prototype.length),
            width: prototype.width,
            max_dec: prototype.max_deceleration.abs(),
            model: AccelerationModel::new(prototype.model.clone()),
            lc_model: prototype.lane_change.clone(),
            segment: RoadSegmentId::default(),
            lane: 0,
            pos: 0.0,
            prev_pos: 0.0,
            vel: 0.0,
            acc: 0.0,
            since_update: None,
            jump_pending: false,
            lane_change: None,
            pending_cooldown: 0.0,
            cooldown: 0.0,
            distance: 0.0,
            travel_time: 0.0,
            route: None,
        }
    }

    /// Creates a stationary obstacle of the given length.
    pub(crate) fn obstacle(id: VehicleId, seq: u64, length: f64) -> Self {
        let prototype = VehiclePrototype {
            label: "obstacle".into(),
            length,
            ..Default::default()
        };
        Self {
            kind: VehicleKind::Obstacle,
            ..Self::new(id, seq, &prototype)
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The insertion-ordered sequence number of the vehicle.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The label of the vehicle's prototype.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> VehicleKind {
        self.kind
    }

    /// Whether the vehicle is a stationary obstacle.
    pub fn is_obstacle(&self) -> bool {
        self.kind == VehicleKind::Obstacle
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The vehicle's effective length in m.
    pub fn effective_length(&self) -> f64 {
        self.eff_len
    }

    /// The vehicle's width in m.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// The ID of the road segment the vehicle is on.
    pub fn segment(&self) -> RoadSegmentId {
        self.segment
    }

    /// The lane index the vehicle is in.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The longitudinal position of the front of the vehicle in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The longitudinal position of the rear of the vehicle in m.
    pub fn pos_rear(&self) -> f64 {
        self.pos - self.eff_len
    }

    /// The position of the front of the vehicle at the end of the previous step.
    pub fn prev_pos(&self) -> f64 {
        self.prev_pos
    }

    /// The vehicle's velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The vehicle's current acceleration in m/s<sup>2</sup>.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.vel < STOPPED_SPEED
    }

    /// The vehicle's acceleration model.
    pub fn model(&self) -> &AccelerationModel {
        &self.model
    }

    /// The vehicle's lane changing model.
    pub fn lane_change_model(&self) -> &LaneChangeModel {
        &self.lc_model
    }

    /// The distance the vehicle has travelled in m.
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// The time the vehicle has spent in the network in s.
    pub fn travel_time(&self) -> f64 {
        self.travel_time
    }

    /// The vehicle's route, if it has one.
    pub fn route(&self) -> Option<&[RoadSegmentId]> {
        self.route.as_ref().map(|r| r.remaining())
    }

    /// Whether the vehicle is in the middle of a lane change.
    pub fn is_changing_lanes(&self) -> bool {
        self.lane_change.is_some()
    }

    /// The lateral offset from the centre of the vehicle's lane, in m (right is positive).
    pub fn lateral_offset(&self) -> f64 {
        self.lane_change.map_or(0.0, |lc| lc.offset())
    }

    /// The lateral speed towards the target lane's centre, in m/s (right is positive).
    pub fn lateral_speed(&self) -> f64 {
        self.lane_change.map_or(0.0, |lc| lc.lateral_speed())
    }

    /// Whether the vehicle may consider a lane change.
    pub fn can_change_lanes(&self) -> bool {
        !self.is_obstacle() && self.lane_change.is_none() && self.cooldown <= 0.0
    }

    /// Whether the front of the vehicle passed `pos` during the last step.
    pub fn crossed(&self, pos: f64) -> bool {
        self.prev_pos < pos && self.pos >= pos
    }

    /// Set the desired velocity adjustment factor for the vehicle, a scalar which is
    /// multiplied with the model's desired speed.
    pub fn set_velocity_adjust(&mut self, factor: f64) {
        self.model.set_velocity_adjust(factor);
    }

    /// Computes the net gap between the front of this vehicle and the rear of
    /// a vehicle ahead, given the leader's position in this vehicle's frame.
    pub(crate) fn gap_to(&self, leader_pos: f64, leader: &Vehicle) -> f64 {
        leader_pos - leader.eff_len - self.pos
    }

    /// Computes the acceleration this vehicle would have following a leader.
    ///
    /// # Parameters
    /// * `leader` - The net gap to and speed of the leader, if there is one
    /// * `speed_limit` - The speed limit at the vehicle's position in m/s
    /// * `dt` - The time step in s
    /// * `rng` - Randomness for stochastic models; `None` for hypothetical evaluations
    pub(crate) fn calc_acceleration(
        &self,
        leader: Option<(f64, f64)>,
        speed_limit: f64,
        dt: f64,
        rng: Option<&mut dyn RngCore>,
    ) -> f64 {
        if self.is_obstacle() {
            return 0.0;
        }
        let input = match leader {
            Some((gap, vel)) => ModelInput::following(gap, self.vel, vel, speed_limit, dt),
            None => ModelInput::free(self.vel, speed_limit, dt),
        };
        let acc = self.model.acceleration(&input, rng);
        if self.model.is_cellular() {
            acc
        } else {
            f64::max(acc, -self.max_dec)
        }
    }

    /// Computes the acceleration needed to stop before a stop line `distance` metres ahead.
    pub(crate) fn calc_stop_acceleration(&self, distance: f64, speed_limit: f64, dt: f64) -> f64 {
        self.calc_acceleration(Some((distance, 0.0)), speed_limit, dt, None)
    }

    /// The deceleration needed to stop within `distance` metres, a positive number.
    pub(crate) fn stopping_deceleration(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            f64::INFINITY
        } else {
            self.vel.powi(2) / (2.0 * distance)
        }
    }

    /// Limits an acceleration so the vehicle comfortably slows down to
    /// an upcoming speed limit `distance` metres ahead.
    pub(crate) fn anticipate_speed_limit(&self, acc: f64, speed_limit: f64, distance: f64) -> f64 {
        if distance <= 0.0 || speed_limit >= self.vel {
            return acc;
        }
        let comf_acc = -self.model.comfortable_deceleration();
        let this_acc = (speed_limit.powi(2) - self.vel.powi(2)) / (2.0 * distance);
        if this_acc <= comf_acc {
            f64::min(acc, f64::max(2.0 * comf_acc, this_acc))
        } else {
            acc
        }
    }

    /// Advances the model clock. Returns `true` if the acceleration model
    /// should be re-evaluated this step.
    pub(crate) fn model_update_due(&mut self, dt: f64) -> bool {
        let interval = self.model.effective_interval(dt);
        let due = match self.since_update {
            None => true,
            Some(t) => t + dt >= interval - CLOCK_EPSILON,
        };
        self.since_update = Some(if due {
            0.0
        } else {
            self.since_update.unwrap_or(0.0) + dt
        });
        self.jump_pending = due && self.model.is_cellular();
        due
    }

    /// Sets the acceleration to be applied in the next integration.
    pub(crate) fn set_acc(&mut self, acc: f64) {
        self.acc = acc;
    }

    /// Integrates the vehicle's velocity and position.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    pub(crate) fn integrate(&mut self, dt: f64) {
        self.prev_pos = self.pos;
        if self.is_obstacle() {
            return;
        }

        if self.model.is_cellular() {
            if self.jump_pending {
                let interval = self.model.effective_interval(dt);
                let vel = f64::max(self.vel + self.acc * interval, 0.0);
                self.pos += vel * interval;
                self.vel = vel;
                self.jump_pending = false;
            }
        } else {
            let vel = self.vel + self.acc * dt;
            if vel < 0.0 {
                // Stop within the step rather than reversing
                if self.acc < 0.0 {
                    self.pos -= 0.5 * self.vel * self.vel / self.acc;
                }
                self.vel = 0.0;
            } else {
                self.pos += self.vel * dt + 0.5 * self.acc * dt * dt;
                self.vel = vel;
            }
        }

        self.distance += self.pos - self.prev_pos;
        self.travel_time += dt;

        // Lateral motion and lane change cooldown
        if let Some(lc) = self.lane_change.as_mut() {
            if lc.step(dt) {
                self.lane_change = None;
                self.cooldown = self.pending_cooldown;
            }
        } else {
            self.cooldown = f64::max(self.cooldown - dt, 0.0);
        }
    }

    /// Places the vehicle on a lane of a segment.
    pub(crate) fn set_location(&mut self, segment: RoadSegmentId, lane: usize, pos: f64) {
        self.segment = segment;
        self.lane = lane;
        self.pos = pos;
        self.prev_pos = pos;
    }

    /// Sets the vehicle's speed.
    pub(crate) fn set_vel(&mut self, vel: f64) {
        self.vel = vel.max(0.0);
    }

    /// Moves the vehicle onto the next segment across a link, carrying over
    /// the distance it has already travelled past the end of the current one.
    /// Returns `false` if the vehicle left its route before reaching its destination.
    pub(crate) fn cross_link(&mut self, segment: RoadSegmentId, lane: usize, length: f64) -> bool {
        self.segment = segment;
        self.lane = lane;
        self.pos -= length;
        self.prev_pos -= length;
        let Some(route) = self.route.as_mut() else {
            return true;
        };
        if route.is_complete() {
            self.route = None;
            true
        } else if route.advance(segment) {
            true
        } else {
            self.route = None;
            false
        }
    }

    /// Moves the vehicle into an adjacent lane of its current segment.
    ///
    /// # Parameters
    /// * `lane` - The target lane
    /// * `transition` - The lateral transition, or `None` for an immediate change
    /// * `cooldown` - The time before the vehicle may change lanes again
    pub(crate) fn change_lane(
        &mut self,
        lane: usize,
        transition: Option<LateralTransition>,
        cooldown: f64,
    ) {
        self.lane = lane;
        self.lane_change = transition;
        if transition.is_some() {
            self.pending_cooldown = cooldown;
        } else {
            self.cooldown = cooldown;
        }
    }

    /// Prevents the vehicle from changing lanes for at least `cooldown` seconds.
    pub(crate) fn block_lane_changes(&mut self, cooldown: f64) {
        self.cooldown = self.cooldown.max(cooldown);
    }

    /// Sets the vehicle's route.
    pub(crate) fn set_route(&mut self, route: Option<Route>) {
        self.route = route;
    }

    /// The next segment on the vehicle's route after its current one.
    pub(crate) fn next_on_route(&self) -> Option<RoadSegmentId> {
        self.route.as_ref().and_then(|r| r.next())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::acceleration::{Gipps, Nsm};
    use assert_approx_eq::assert_approx_eq;

    fn vehicle(model: ModelParams) -> Vehicle {
        Vehicle::new(
            VehicleId::default(),
            0,
            &VehiclePrototype {
                model,
                ..Default::default()
            },
        )
    }

    #[test]
    fn cross_link_follows_route() {
        let mut ids = slotmap::SlotMap::<RoadSegmentId, ()>::with_key();
        let [a, b, c, d] = [(); 4].map(|_| ids.insert(()));

        let mut veh = vehicle(ModelParams::default());
        veh.set_route(Some(Route::new(vec![a, b, c])));
        assert!(veh.cross_link(b, 0, 0.0));
        assert_eq!(veh.route(), Some(&[b, c][..]));
        // Off the route
        assert!(!veh.cross_link(d, 0, 0.0));
        assert!(veh.route().is_none());

        // Past the destination
        veh.set_route(Some(Route::new(vec![c])));
        assert!(veh.cross_link(d, 0, 0.0));
        assert!(veh.route().is_none());
    }

    #[test]
    fn ballistic_integration() {
        let mut veh = vehicle(ModelParams::default());
        veh.set_vel(10.0);
        veh.set_acc(1.0);
        veh.integrate(0.5);
        assert_approx_eq!(veh.vel(), 10.5);
        assert_approx_eq!(veh.pos(), 5.125);
        assert_approx_eq!(veh.distance(), 5.125);
        assert!(veh.crossed(5.0));
    }

    #[test]
    fn stops_without_reversing() {
        let mut veh = vehicle(ModelParams::default());
        veh.set_vel(2.0);
        veh.set_acc(-8.0);
        veh.integrate(0.5);
        assert_eq!(veh.vel(), 0.0);
        assert_approx_eq!(veh.pos(), 0.25);
    }

    #[test]
    fn iterated_map_coasts_between_updates() {
        let mut veh = vehicle(ModelParams::Gipps(Gipps::default()));
        let due = (0..10).map(|_| veh.model_update_due(0.1)).collect::<Vec<_>>();
        assert_eq!(
            due,
            vec![true, false, false, false, false, true, false, false, false, false]
        );
    }

    #[test]
    fn cellular_jumps_once_per_interval() {
        let mut veh = vehicle(ModelParams::Nsm(Nsm::default()));
        veh.set_vel(7.5);
        assert!(veh.model_update_due(0.5));
        veh.set_acc(7.5);
        veh.integrate(0.5);
        assert_approx_eq!(veh.pos(), 15.0);
        assert_approx_eq!(veh.vel(), 15.0);
        assert!(!veh.model_update_due(0.5));
        veh.integrate(0.5);
        assert_approx_eq!(veh.pos(), 15.0);
    }

    #[test]
    fn obstacles_stay_put() {
        let mut obstacle = Vehicle::obstacle(VehicleId::default(), 0, 0.0);
        obstacle.set_acc(1.0);
        obstacle.integrate(1.0);
        assert_eq!(obstacle.pos(), 0.0);
        assert!(!obstacle.can_change_lanes());
    }

    #[test]
    fn speed_limit_anticipation() {
        let mut veh = vehicle(ModelParams::default());
        veh.set_vel(30.0);
        // Far away: no effect
        assert_approx_eq!(veh.anticipate_speed_limit(0.5, 10.0, 1000.0), 0.5);
        // Close: brake, but no harder than twice the comfortable deceleration
        assert_approx_eq!(veh.anticipate_speed_limit(0.5, 10.0, 100.0), -3.0);
    }
}
