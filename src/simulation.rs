use crate::error::ConsistencyViolation;
use crate::light::{LightStatus, AMBER_MAX_DECEL};
use crate::network::{LaneRef, Neighbour};
use crate::road::{LaneType, SpeedLimits};
use crate::sink::TrafficSink;
use crate::snapshot::{
    LaneSnapshot, LightSnapshot, SimObserver, SimulationSnapshot, SinkSnapshot, SourceSnapshot,
    Subscription, VehicleSnapshot,
};
use crate::source::{insertion_speed, TrafficSource};
use crate::vehicle::lane_change::{
    AccelerationChange, Direction, LaneChangeConfig, LaneChangeMode, LateralTransition,
    Neighbourhood,
};
use crate::vehicle::routing::{find_route, lanes_towards};
use crate::{
    LightSet, RoadNetwork, RoadSegment, RoadSegmentId, SimError, TrafficLight, TrafficLightId,
    Vehicle, VehicleId, VehiclePrototype, VehicleSet,
};
use arrayvec::ArrayVec;
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Obstacles closer than this force a lane change, in m.
const OBSTACLE_LOOKAHEAD: f64 = 150.0; // m

/// The length of the obstacle closing off each entrance lane, in m.
const ENTRANCE_OBSTACLE_LENGTH: f64 = 1.0; // m

/// The range desired velocity adjustment factors are clamped to.
const VELOCITY_ADJUST_RANGE: (f64, f64) = (0.75, 1.25);

/// Tolerance for comparing accumulated simulation times, in s.
const TIME_EPSILON: f64 = 1e-9; // s

/// Overlaps smaller than this are attributed to rounding, in m.
const GAP_TOLERANCE: f64 = 1e-6; // m

/// What to do when a consistency check fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyPolicy {
    /// Log the violations and stop the simulation with an error.
    #[default]
    Abort,
    /// Log the violations and carry on.
    Warn,
}

/// Global simulation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// The fixed time step in s.
    pub timestep: f64,
    /// The seed of the simulation's random number generator.
    pub seed: u64,
    pub consistency: ConsistencyPolicy,
    pub lane_change: LaneChangeConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 0.2,
            seed: 42,
            consistency: ConsistencyPolicy::default(),
            lane_change: LaneChangeConfig::default(),
        }
    }
}

/// A lane change that has passed its checks and is about to be carried out.
#[derive(Clone, Copy, Debug)]
struct LaneChangeDecision {
    target: usize,
    direction: Direction,
    /// The vehicle's acceleration in the target lane.
    acc: f64,
    /// The new leader in the target lane.
    leader: Option<VehicleId>,
    /// The new follower in the target lane and its acceleration behind the vehicle.
    follower: Option<(VehicleId, f64)>,
    /// The speed the vehicle must not exceed after merging.
    merge_speed: Option<f64>,
}

/// Why a vehicle is obliged to change lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MandatoryReason {
    Route,
    Entrance,
    Exit,
    Obstacle,
}

/// A traffic simulation.
pub struct Simulation {
    /// The road network, which also holds the sources and sinks.
    network: RoadNetwork,
    /// The vehicles being simulated.
    vehicles: VehicleSet,
    /// The traffic lights.
    lights: LightSet,
    /// The vehicle prototypes by label.
    prototypes: HashMap<String, VehiclePrototype>,
    config: SimulationConfig,
    rng: StdRng,
    /// The simulation time in s.
    time: f64,
    /// The current frame of simulation.
    frame: usize,
    /// The next sequence number.
    seq: u64,
    /// The registered observers.
    observers: Vec<Subscription>,
}

impl Simulation {
    /// Creates a simulation of a road network. Every entrance lane is closed off
    /// at its downstream end by an obstacle.
    pub fn new(network: RoadNetwork, config: SimulationConfig) -> Result<Self, SimError> {
        if !(config.timestep > 0.0 && config.timestep.is_finite()) {
            return Err(SimError::InvalidTimestep(config.timestep));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        let mut sim = Self {
            network,
            vehicles: VehicleSet::default(),
            lights: LightSet::default(),
            prototypes: HashMap::new(),
            config,
            rng,
            time: 0.0,
            frame: 0,
            seq: 0,
            observers: vec![],
        };

        let entrances = sim
            .network
            .segments()
            .flat_map(|segment| {
                segment
                    .lanes()
                    .iter()
                    .positions(|lane| lane.lane_type() == LaneType::Entrance)
                    .map(move |lane| (LaneRef::new(segment.id(), lane), segment.length()))
            })
            .collect::<Vec<_>>();
        for (lane, length) in entrances {
            sim.add_obstacle(lane, length, ENTRANCE_OBSTACLE_LENGTH)?;
        }

        info!(
            "created simulation of {} segments, dt = {} s, seed = {}",
            sim.network.num_segments(),
            sim.config.timestep,
            sim.config.seed
        );
        Ok(sim)
    }

    /// Registers a vehicle prototype under its label, replacing any with the same label.
    pub fn add_prototype(&mut self, prototype: VehiclePrototype) {
        if let Some(interval) = prototype.model.cellular_interval() {
            let ratio = interval / self.config.timestep;
            if ratio < 1.0 - TIME_EPSILON || (ratio - ratio.round()).abs() > 1e-6 {
                warn!(
                    "prototype '{}': update interval {} s is not a multiple of the time step {} s",
                    prototype.label, interval, self.config.timestep
                );
            }
        }
        self.prototypes.insert(prototype.label.clone(), prototype);
    }

    /// Gets a registered vehicle prototype.
    pub fn prototype(&self, label: &str) -> Option<&VehiclePrototype> {
        self.prototypes.get(label)
    }

    /// Adds a vehicle of a registered prototype to a lane.
    ///
    /// # Parameters
    /// * `label` - The label of the vehicle's prototype
    /// * `lane` - The lane to place the vehicle on
    /// * `pos` - The position of the front of the vehicle along the segment
    /// * `vel` - The initial speed in m/s
    pub fn add_vehicle(
        &mut self,
        label: &str,
        lane: LaneRef,
        pos: f64,
        vel: f64,
    ) -> Result<VehicleId, SimError> {
        self.check_lane(lane)?;
        let prototype = self
            .prototypes
            .get(label)
            .ok_or_else(|| SimError::UnknownPrototype(label.to_string()))?;

        let factor = if prototype.speed_stddev > 0.0 {
            let distr = rand_distr::Normal::new(1.0, prototype.speed_stddev)
                .map_err(|err| SimError::Config(format!("prototype '{label}': {err}")))?;
            let (min, max) = VELOCITY_ADJUST_RANGE;
            distr.sample(&mut self.rng).clamp(min, max)
        } else {
            1.0
        };

        let seq = self.seq;
        self.seq += 1;
        let id = self.vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::new(id, seq, prototype);
            vehicle.set_location(lane.segment, lane.lane, pos);
            vehicle.set_vel(vel);
            vehicle.set_velocity_adjust(factor);
            vehicle
        });
        self.insert_into_lane(lane, id);
        debug!("added vehicle {id:?} ('{label}') at {pos:.1} m on lane {}", lane.lane);
        Ok(id)
    }

    /// Adds a stationary obstacle to a lane, with its front at `pos`.
    pub fn add_obstacle(
        &mut self,
        lane: LaneRef,
        pos: f64,
        length: f64,
    ) -> Result<VehicleId, SimError> {
        self.check_lane(lane)?;
        let seq = self.seq;
        self.seq += 1;
        let id = self.vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::obstacle(id, seq, length);
            vehicle.set_location(lane.segment, lane.lane, pos);
            vehicle
        });
        self.insert_into_lane(lane, id);
        Ok(id)
    }

    /// Removes a vehicle from the simulation.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<Vehicle> {
        let vehicle = self.vehicles.remove(id)?;
        if let Some(lane) = self
            .network
            .lane_mut(LaneRef::new(vehicle.segment(), vehicle.lane()))
        {
            lane.remove(id);
        }
        Some(vehicle)
    }

    /// Routes a vehicle towards the named segment along the shortest path.
    pub fn set_vehicle_destination(&mut self, id: VehicleId, destination: &str) -> Result<(), SimError> {
        let to = self.segment_by_name(destination)?;
        let vehicle = self
            .vehicles
            .get(id)
            .ok_or_else(|| SimError::Config(format!("vehicle {id:?} does not exist")))?;
        let from = vehicle.segment();
        let route = find_route(&self.network, from, to).ok_or_else(|| SimError::NoRoute {
            from: self.segment_name(from),
            to: destination.to_string(),
        })?;
        self.vehicles[id].set_route(Some(route));
        Ok(())
    }

    /// Adds a traffic light to the simulation.
    pub fn add_traffic_light(&mut self, light: TrafficLight) -> Result<TrafficLightId, SimError> {
        let segment = light.segment();
        if self.network.segment(segment).is_none() {
            return Err(SimError::UnknownSegment(format!("{segment:?}")));
        }
        if light.cycle_time() <= 0.0 {
            return Err(SimError::Config(format!(
                "traffic light on '{}' has an empty cycle",
                self.segment_name(segment)
            )));
        }
        let id = self.lights.insert(light);
        if let Some(segment) = self.network.segment_mut(segment) {
            segment.add_light(id);
        }
        Ok(id)
    }

    /// Attaches a source to the upstream end of a segment, replacing any existing one.
    pub fn add_source(&mut self, segment: RoadSegmentId, source: TrafficSource) -> Result<(), SimError> {
        let (name, lanes) = match self.network.segment(segment) {
            Some(s) => (s.name().to_string(), s.num_lanes()),
            None => return Err(SimError::UnknownSegment(format!("{segment:?}"))),
        };
        if let Some(lane) = source.requested_lanes().into_iter().find(|l| *l >= lanes) {
            return Err(SimError::Config(format!(
                "source on '{name}' schedules a vehicle on lane {lane}, but the segment has {lanes} lanes"
            )));
        }
        if let Some(label) = source
            .labels()
            .into_iter()
            .find(|label| !self.prototypes.contains_key(*label))
        {
            return Err(SimError::UnknownPrototype(label.to_string()));
        }
        for destination in source.destinations() {
            self.segment_by_name(destination)?;
        }
        if let Some(segment) = self.network.segment_mut(segment) {
            segment.set_source(source);
        }
        Ok(())
    }

    /// Attaches a sink to the downstream end of a segment, replacing any existing one.
    pub fn add_sink(&mut self, segment: RoadSegmentId, sink: TrafficSink) -> Result<(), SimError> {
        self.network
            .segment_mut(segment)
            .ok_or_else(|| SimError::UnknownSegment(format!("{segment:?}")))?
            .set_sink(sink);
        Ok(())
    }

    /// Sets the speed limits of a lane.
    pub fn set_speed_limits(&mut self, lane: LaneRef, limits: SpeedLimits) -> Result<(), SimError> {
        self.check_lane(lane)?;
        if let Some(lane) = self.network.lane_mut(lane) {
            lane.set_speed_limits(limits);
        }
        Ok(())
    }

    /// Registers an observer, which receives a snapshot of the simulation
    /// every `interval` seconds of simulation time.
    pub fn subscribe(&mut self, interval: f64, observer: Box<dyn SimObserver>) {
        let interval = interval.max(0.0);
        self.observers.push(Subscription {
            interval,
            next_due: self.time + interval,
            observer,
        });
    }

    /// Randomly assigns a desired velocity adjustment factor to each vehicle,
    /// which is sampled from a normal distribution with a mean of 1 (no adjustment)
    /// and standard deviation of `stddev`.
    pub fn randomise_velocity_adjusts(&mut self, stddev: f64) -> Result<(), SimError> {
        let distr = rand_distr::Normal::new(1.0, stddev)
            .map_err(|err| SimError::Config(format!("invalid standard deviation: {err}")))?;
        let (min, max) = VELOCITY_ADJUST_RANGE;
        for (_, vehicle) in &mut self.vehicles {
            let factor = distr.sample(&mut self.rng).clamp(min, max);
            vehicle.set_velocity_adjust(factor);
        }
        Ok(())
    }

    /// Advances the simulation by one time step.
    pub fn step(&mut self) -> Result<(), SimError> {
        let dt = self.config.timestep;
        self.time += dt;
        self.frame += 1;

        trace!("frame {} (t = {:.2} s): lights", self.frame, self.time);
        self.update_lights(dt);
        trace!("frame {}: accelerations", self.frame);
        self.apply_accelerations(dt);
        trace!("frame {}: lane changes", self.frame);
        self.change_lanes(dt);
        trace!("frame {}: integration", self.frame);
        self.integrate(dt);
        let mut violations = self.advance_vehicles();
        trace!("frame {}: boundaries", self.frame);
        self.absorb_vehicles();
        self.insert_vehicles(dt);
        self.notify_observers();

        violations.extend(self.check_consistency());
        if violations.is_empty() {
            return Ok(());
        }
        match self.config.consistency {
            ConsistencyPolicy::Abort => {
                for violation in &violations {
                    error!("t = {:.2} s: {}", self.time, violation);
                }
                Err(SimError::Consistency(violations))
            }
            ConsistencyPolicy::Warn => {
                for violation in &violations {
                    warn!("t = {:.2} s: {}", self.time, violation);
                }
                Ok(())
            }
        }
    }

    /// Steps the simulation until the simulation time reaches `end`.
    /// Returns the number of steps taken.
    pub fn run_until(&mut self, end: f64) -> Result<usize, SimError> {
        let mut steps = 0;
        while self.time + 0.5 * self.config.timestep <= end {
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    /// The simulation time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    /// Gets a vehicle by ID.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Returns an iterator over all the vehicles in the simulation, including obstacles.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// The number of vehicles in the simulation, excluding obstacles.
    pub fn num_vehicles(&self) -> usize {
        self.vehicles.values().filter(|v| !v.is_obstacle()).count()
    }

    /// Returns an iterator over all the traffic lights in the simulation.
    pub fn iter_lights(&self) -> impl Iterator<Item = (TrafficLightId, &TrafficLight)> {
        self.lights.iter()
    }

    /// Captures the current state of the simulation.
    pub fn snapshot(&self) -> SimulationSnapshot {
        let mut lanes = vec![];
        let mut sources = vec![];
        let mut sinks = vec![];
        for segment in self.network.segments() {
            for (idx, lane) in segment.lanes().iter().enumerate() {
                let vehicles = lane
                    .vehicles()
                    .iter()
                    .map(|id| Self::vehicle_snapshot(segment, &self.vehicles[*id]))
                    .collect();
                lanes.push(LaneSnapshot {
                    segment: segment.id(),
                    segment_name: segment.name().to_string(),
                    lane: idx,
                    vehicles,
                });
            }
            if let Some(source) = segment.source() {
                sources.push(SourceSnapshot {
                    segment: segment.id(),
                    segment_name: segment.name().to_string(),
                    inserted: source.inserted(),
                    queue_len: source.queue_len(),
                    inflow_rate: source.inflow_rate(),
                });
            }
            if let Some(sink) = segment.sink() {
                sinks.push(SinkSnapshot {
                    segment: segment.id(),
                    segment_name: segment.name().to_string(),
                    implicit: sink.is_implicit(),
                    count: sink.count(),
                    total_distance: sink.total_distance(),
                    total_time: sink.total_time(),
                    outflow_rate: sink.outflow_rate(),
                });
            }
        }
        let lights = self
            .lights
            .iter()
            .map(|(id, light)| LightSnapshot {
                id,
                segment: light.segment(),
                pos: light.pos(),
                status: light.status(),
                time_to_next_red: light.time_to_next_red(),
                time_to_next_green: light.time_to_next_green(),
            })
            .collect();
        SimulationSnapshot {
            time: self.time,
            frame: self.frame,
            lanes,
            lights,
            sources,
            sinks,
        }
    }

    fn vehicle_snapshot(segment: &RoadSegment, vehicle: &Vehicle) -> VehicleSnapshot {
        let coords = segment.world_coords(vehicle.lane(), vehicle.pos(), vehicle.lateral_offset());
        VehicleSnapshot {
            id: vehicle.id(),
            seq: vehicle.seq(),
            label: vehicle.label().to_string(),
            model: vehicle.model().name(),
            lane: vehicle.lane(),
            pos: vehicle.pos(),
            vel: vehicle.vel(),
            acc: vehicle.acc(),
            lateral_offset: vehicle.lateral_offset(),
            lateral_speed: vehicle.lateral_speed(),
            coords: [coords.x, coords.y],
            is_obstacle: vehicle.is_obstacle(),
        }
    }

    fn check_lane(&self, lane: LaneRef) -> Result<(), SimError> {
        let segment = self
            .network
            .segment(lane.segment)
            .ok_or_else(|| SimError::UnknownSegment(format!("{:?}", lane.segment)))?;
        if lane.lane >= segment.num_lanes() {
            return Err(SimError::Config(format!(
                "segment '{}' has no lane {}",
                segment.name(),
                lane.lane
            )));
        }
        Ok(())
    }

    fn segment_by_name(&self, name: &str) -> Result<RoadSegmentId, SimError> {
        self.network
            .segment_id(name)
            .ok_or_else(|| SimError::UnknownSegment(name.to_string()))
    }

    fn segment_name(&self, id: RoadSegmentId) -> String {
        self.network
            .segment(id)
            .map_or_else(|| format!("{id:?}"), |s| s.name().to_string())
    }

    fn insert_into_lane(&mut self, lane: LaneRef, id: VehicleId) {
        if let Some(lane) = self.network.lane_mut(lane) {
            lane.insert(&self.vehicles, id);
        }
    }

    /// Updates the traffic lights.
    fn update_lights(&mut self, dt: f64) {
        for (_, light) in &mut self.lights {
            light.step(dt);
        }
    }

    /// Evaluates the acceleration models of the vehicles whose update is due.
    /// The others coast on their previous acceleration.
    fn apply_accelerations(&mut self, dt: f64) {
        let due = self
            .vehicles
            .iter_mut()
            .filter(|(_, vehicle)| !vehicle.is_obstacle())
            .filter_map(|(id, vehicle)| vehicle.model_update_due(dt).then_some(id))
            .collect::<Vec<_>>();

        let mut accs = Vec::with_capacity(due.len());
        for id in due {
            let vehicle = &self.vehicles[id];
            let acc = longitudinal_acceleration(
                &self.network,
                &self.vehicles,
                &self.lights,
                vehicle,
                dt,
                &mut self.rng,
            );
            accs.push((id, acc));
        }
        for (id, acc) in accs {
            self.vehicles[id].set_acc(acc);
        }
    }

    /// Considers and carries out lane changes, in order of vehicle creation.
    fn change_lanes(&mut self, dt: f64) {
        let candidates = self
            .vehicles
            .values()
            .filter(|v| v.can_change_lanes())
            .sorted_by_key(|v| v.seq())
            .map(|v| v.id())
            .collect::<Vec<_>>();

        for id in candidates {
            // A neighbour's lane change may have blocked this vehicle
            if !self.vehicles[id].can_change_lanes() {
                continue;
            }
            if let Some(decision) = self.lane_change_decision(id, dt) {
                self.apply_lane_change(id, decision);
            }
        }
    }

    /// Decides whether a vehicle should change lanes, and to which lane.
    fn lane_change_decision(&self, id: VehicleId, dt: f64) -> Option<LaneChangeDecision> {
        let vehicle = &self.vehicles[id];
        let segment = self.network.segment(vehicle.segment())?;
        let lanes = segment.num_lanes();
        if lanes < 2 {
            return None;
        }
        let current = vehicle.lane();
        let lane_type = segment.lane(current)?.lane_type();
        let model = vehicle.lane_change_model();

        let route_lanes = vehicle
            .next_on_route()
            .map(|next| lanes_towards(segment, next))
            .filter(|lanes| !lanes.is_empty());
        let on_route = route_lanes.as_ref().map(|l| l.contains(&current));

        let nearest = |pred: &dyn Fn(usize) -> bool| -> Option<usize> {
            (0..lanes)
                .filter(|l| pred(*l))
                .min_by_key(|l| l.abs_diff(current))
        };
        let is_traffic = |l: usize| segment.lanes()[l].lane_type() == LaneType::Traffic;

        let obstacle_ahead = self.network.leader(&self.vehicles, vehicle).map_or(false, |n| {
            self.vehicles[n.id].is_obstacle()
                && n.rear(&self.vehicles) - vehicle.pos() < OBSTACLE_LOOKAHEAD
        });

        let reason = if on_route == Some(false) {
            Some(MandatoryReason::Route)
        } else if lane_type == LaneType::Entrance {
            Some(MandatoryReason::Entrance)
        } else if lane_type == LaneType::Exit && on_route != Some(true) {
            Some(MandatoryReason::Exit)
        } else if obstacle_ahead {
            Some(MandatoryReason::Obstacle)
        } else {
            None
        };

        let mut directions = ArrayVec::<Direction, 2>::new();
        match reason {
            Some(MandatoryReason::Route) => {
                let route = route_lanes.as_ref()?;
                let target = nearest(&|l: usize| route.contains(&l))?;
                directions.extend(Direction::towards(current, target));
            }
            Some(MandatoryReason::Entrance | MandatoryReason::Exit) => {
                let target = nearest(&is_traffic)?;
                directions.extend(Direction::towards(current, target));
            }
            Some(MandatoryReason::Obstacle) | None => {
                directions.push(Direction::Left);
                directions.push(Direction::Right);
            }
        }

        let allowed = |target: usize| match reason {
            Some(MandatoryReason::Obstacle) => {
                segment.lanes()[target].lane_type() != LaneType::Entrance
            }
            Some(_) => true,
            None => match &route_lanes {
                Some(lanes) => lanes.contains(&target),
                None => is_traffic(target),
            },
        };

        let mut best: Option<(f64, LaneChangeDecision)> = None;
        for direction in directions {
            let target = match direction.target(current, lanes) {
                Some(target) if allowed(target) => target,
                _ => continue,
            };
            let (situation, leader, follower) = self.neighbourhood(vehicle, segment, target, dt);

            if reason.is_some() {
                if model.evaluate_mandatory(&situation).is_err() {
                    continue;
                }
                let merge_speed = match reason {
                    Some(MandatoryReason::Entrance) => leader.map(|l| self.vehicles[l.id].vel()),
                    _ => None,
                };
                return Some(LaneChangeDecision {
                    target,
                    direction,
                    acc: situation.own.after,
                    leader: leader.map(|l| l.id),
                    follower: follower.zip(situation.new_follower).map(|(f, acc)| (f.id, acc.after)),
                    merge_speed,
                });
            }

            if let Ok(balance) = model.evaluate(&situation, direction) {
                if best.as_ref().map_or(true, |(b, _)| balance > *b) {
                    let decision = LaneChangeDecision {
                        target,
                        direction,
                        acc: situation.own.after,
                        leader: leader.map(|l| l.id),
                        follower: follower
                            .zip(situation.new_follower)
                            .map(|(f, acc)| (f.id, acc.after)),
                        merge_speed: None,
                    };
                    best = Some((balance, decision));
                }
            }
        }
        best.map(|(_, decision)| decision)
    }

    /// Describes the situation of a vehicle considering a change into `target`,
    /// along with its prospective leader and follower there.
    fn neighbourhood(
        &self,
        vehicle: &Vehicle,
        segment: &RoadSegment,
        target: usize,
        dt: f64,
    ) -> (Neighbourhood, Option<Neighbour>, Option<Neighbour>) {
        let vehicles = &self.vehicles;
        let pos = vehicle.pos();
        let rear = pos - vehicle.effective_length();

        let old_leader = self.network.leader(vehicles, vehicle);
        let old_follower = self.network.follower(vehicles, vehicle);
        let (new_leader, new_follower) =
            self.network
                .around(vehicles, LaneRef::new(segment.id(), target), pos);

        // The rear position and speed of a neighbour
        let tail = |n: &Neighbour| (n.rear(vehicles), vehicles[n.id].vel());
        let gap_from = |front: f64, leader: Option<(f64, f64)>| {
            leader.map(|(rear, vel)| (rear - front, vel))
        };
        let follow = |f: &Neighbour, leader: Option<(f64, f64)>| {
            let follower = &vehicles[f.id];
            let limit = speed_limit_of(&self.network, follower);
            follower.calc_acceleration(gap_from(f.pos, leader), limit, dt, None)
        };

        let own = AccelerationChange {
            before: vehicle.calc_acceleration(
                gap_from(pos, old_leader.as_ref().map(tail)),
                segment.speed_limit_at(vehicle.lane(), pos),
                dt,
                None,
            ),
            after: vehicle.calc_acceleration(
                gap_from(pos, new_leader.as_ref().map(tail)),
                segment.speed_limit_at(target, pos),
                dt,
                None,
            ),
        };
        let ego = Some((rear, vehicle.vel()));
        let new_follower_change = new_follower.as_ref().map(|f| AccelerationChange {
            before: follow(f, new_leader.as_ref().map(tail)),
            after: follow(f, ego),
        });
        let old_follower_change = old_follower.as_ref().map(|f| AccelerationChange {
            before: follow(f, ego),
            after: follow(f, old_leader.as_ref().map(tail)),
        });

        let neighbour_changing = [old_leader, new_leader, new_follower]
            .iter()
            .flatten()
            .any(|n| vehicles[n.id].is_changing_lanes());

        let situation = Neighbourhood {
            front_gap: new_leader.as_ref().map(|l| l.rear(vehicles) - pos),
            back_gap: new_follower.as_ref().map(|f| rear - f.pos),
            neighbour_changing,
            own,
            new_follower: new_follower_change,
            old_follower: old_follower_change,
        };
        (situation, new_leader, new_follower)
    }

    /// Moves a vehicle into its target lane.
    fn apply_lane_change(&mut self, id: VehicleId, decision: LaneChangeDecision) {
        let LaneChangeConfig {
            mode,
            cooldown,
            lane_width,
        } = self.config.lane_change;
        let vehicle = &mut self.vehicles[id];
        let from = LaneRef::new(vehicle.segment(), vehicle.lane());
        let to = LaneRef::new(vehicle.segment(), decision.target);

        if let Some(lane) = self.network.lane_mut(from) {
            lane.remove(id);
        }
        let transition = match mode {
            LaneChangeMode::Immediate => None,
            LaneChangeMode::Gradual { duration } => Some(LateralTransition::new(
                decision.direction,
                lane_width,
                duration,
            )),
        };
        vehicle.change_lane(decision.target, transition, cooldown);
        vehicle.set_acc(decision.acc);
        if let Some(speed) = decision.merge_speed {
            vehicle.set_vel(vehicle.vel().min(speed));
        }
        debug!(
            "vehicle {id:?} changed from lane {} to {} at {:.1} m",
            from.lane,
            to.lane,
            vehicle.pos()
        );
        self.insert_into_lane(to, id);

        if let Some((follower, acc)) = decision.follower {
            let follower = &mut self.vehicles[follower];
            follower.set_acc(acc);
            follower.block_lane_changes(cooldown);
        }
        if let Some(leader) = decision.leader {
            self.vehicles[leader].block_lane_changes(cooldown);
        }
    }

    /// Integrates the velocities and positions of all vehicles.
    fn integrate(&mut self, dt: f64) {
        for (_, vehicle) in &mut self.vehicles {
            vehicle.integrate(dt);
        }
    }

    /// Moves vehicles which have passed the end of their segment across
    /// the downstream link, then restores the ordering of every lane.
    /// Returns the lanes whose ordering had changed.
    fn advance_vehicles(&mut self) -> Vec<ConsistencyViolation> {
        let mut crossing = vec![];
        for segment in self.network.segments() {
            for lane in segment.lanes() {
                if lane.downstream().is_none() {
                    continue;
                }
                crossing.extend(
                    lane.vehicles()
                        .iter()
                        .filter(|id| self.vehicles[**id].pos() > segment.length()),
                );
            }
        }

        for id in crossing {
            loop {
                let vehicle = &self.vehicles[id];
                let from = LaneRef::new(vehicle.segment(), vehicle.lane());
                let length = match self.network.segment(from.segment) {
                    Some(segment) if vehicle.pos() > segment.length() => segment.length(),
                    _ => break,
                };
                let next = match self.network.lane(from).and_then(|l| l.downstream()) {
                    Some(next) => next,
                    None => break,
                };
                if let Some(lane) = self.network.lane_mut(from) {
                    lane.remove(id);
                }
                if !self.vehicles[id].cross_link(next.segment, next.lane, length) {
                    warn!(
                        "vehicle {id:?} left its route onto '{}'",
                        self.segment_name(next.segment)
                    );
                }
                self.insert_into_lane(next, id);
            }
        }

        let mut violations = vec![];
        let ids = self.network.segment_ids().collect::<Vec<_>>();
        for segment_id in ids {
            let Some(segment) = self.network.segment_mut(segment_id) else {
                continue;
            };
            for idx in 0..segment.num_lanes() {
                let changed = segment
                    .lane_mut(idx)
                    .map_or(false, |lane| lane.sort(&self.vehicles));
                if changed {
                    violations.push(ConsistencyViolation::OrderChanged {
                        segment: segment_id,
                        lane: idx,
                    });
                }
            }
        }
        violations
    }

    /// Removes vehicles which have passed the end of a lane with no downstream link,
    /// recording them in the segment's sink.
    fn absorb_vehicles(&mut self) {
        let ids = self.network.segment_ids().collect::<Vec<_>>();
        for segment_id in ids {
            let Some(segment) = self.network.segment_mut(segment_id) else {
                continue;
            };
            let length = segment.length();
            let mut exited = SmallVec::<[VehicleId; 4]>::new();
            for idx in 0..segment.num_lanes() {
                if let Some(lane) = segment.lane_mut(idx) {
                    if lane.downstream().is_none() {
                        let vehicles = &self.vehicles;
                        exited.extend(lane.drain_front(|id| vehicles[id].pos() > length));
                    }
                }
            }

            let sink = if exited.is_empty() {
                segment.sink_mut()
            } else {
                Some(segment.sink_or_default())
            };
            if let Some(sink) = sink {
                for id in &exited {
                    sink.absorb(&self.vehicles[*id], self.time);
                }
                sink.update(self.time);
            }
            for id in exited {
                if let Some(vehicle) = self.vehicles.remove(id) {
                    debug!(
                        "vehicle {id:?} left the network after {:.1} s",
                        vehicle.travel_time()
                    );
                }
            }
        }
    }

    /// Lets every source insert the vehicles it has queued, as far as space allows.
    fn insert_vehicles(&mut self, dt: f64) {
        let ids = self.network.segment_ids().collect::<Vec<_>>();
        for segment_id in ids {
            let Some(mut source) = self
                .network
                .segment_mut(segment_id)
                .and_then(|s| s.take_source())
            else {
                continue;
            };
            source.advance(self.time, dt, &mut self.rng);
            self.insert_from_source(segment_id, &mut source);
            if let Some(segment) = self.network.segment_mut(segment_id) {
                segment.set_source(source);
            }
        }
    }

    /// Inserts the vehicles queued at a source onto the lanes with the largest
    /// admissible gaps, at most one per lane.
    fn insert_from_source(&mut self, segment_id: RoadSegmentId, source: &mut TrafficSource) {
        let Some(segment) = self.network.segment(segment_id) else {
            return;
        };
        let lanes = segment.num_lanes();
        let lane_types = segment.lanes().iter().map(|l| l.lane_type()).collect::<Vec<_>>();
        let order = source.lane_order(lanes).collect::<SmallVec<[usize; 4]>>();
        let mut used = vec![false; lanes];

        while let Some(pending) = source.peek() {
            let Some(prototype) = self.prototypes.get(&pending.label) else {
                warn!(
                    "source on '{}' dropped unknown prototype '{}'",
                    self.segment_name(segment_id),
                    pending.label
                );
                source.pop_inserted(self.time);
                continue;
            };
            let eff_len = prototype.effective_length.unwrap_or(prototype.length);
            let cellular = prototype.model.cellular_interval();
            let desired = prototype.model.desired_speed();
            let entry_speed = pending.speed.or_else(|| source.entry_speed(self.time));

            let candidates = order.iter().copied().filter(|l| {
                !used[*l]
                    && match pending.lane {
                        Some(lane) => lane == *l,
                        None => lane_types[*l] == LaneType::Traffic,
                    }
            });
            let mut best: Option<(usize, f64, f64)> = None;
            for lane in candidates {
                let speed = entry_speed.unwrap_or_else(|| {
                    desired.min(segment_speed_limit(&self.network, segment_id, lane))
                });
                let Some((gap, speed)) =
                    self.insertion_gap(segment_id, lane, speed, eff_len, cellular)
                else {
                    continue;
                };
                if best.map_or(true, |(_, best_gap, _)| gap > best_gap) {
                    best = Some((lane, gap, speed));
                }
            }
            let Some((lane, _, speed)) = best else {
                break;
            };

            let Some(pending) = source.pop_inserted(self.time) else {
                break;
            };
            used[lane] = true;
            let label = pending.label;
            match self.add_vehicle(&label, LaneRef::new(segment_id, lane), 0.0, speed) {
                Ok(id) => {
                    if let Some(destination) = pending.destination {
                        if let Err(err) = self.set_vehicle_destination(id, &destination) {
                            warn!("vehicle {id:?} is unrouted: {err}");
                        }
                    }
                }
                Err(err) => warn!("could not insert '{label}': {err}"),
            }
        }
    }

    /// Measures the space at the start of a lane for a new vehicle. Returns the gap
    /// to the leader and the speed the vehicle may enter at, if it fits.
    fn insertion_gap(
        &self,
        segment: RoadSegmentId,
        lane: usize,
        speed: f64,
        length: f64,
        cellular: Option<f64>,
    ) -> Option<(f64, f64)> {
        let (leader, follower) = self
            .network
            .around(&self.vehicles, LaneRef::new(segment, lane), 0.0);
        if follower.map_or(false, |f| f.pos > -length) {
            return None;
        }
        let gap = leader.map_or(f64::INFINITY, |l| l.rear(&self.vehicles));
        let leader_speed = leader.map(|l| self.vehicles[l.id].vel());
        let speed = insertion_speed(gap, leader_speed, speed, length, cellular)?;
        Some((gap, speed))
    }

    /// Passes a snapshot to every observer which is due.
    fn notify_observers(&mut self) {
        let time = self.time;
        if !self
            .observers
            .iter()
            .any(|s| s.next_due <= time + TIME_EPSILON)
        {
            return;
        }
        let snapshot = self.snapshot();
        let dt = self.config.timestep;
        for sub in &mut self.observers {
            if sub.next_due <= time + TIME_EPSILON {
                sub.observer.observe(&snapshot);
                while sub.next_due <= time + TIME_EPSILON {
                    sub.next_due += sub.interval.max(dt);
                }
            }
        }
    }

    /// Checks that no two vehicles in a lane share a position or overlap.
    fn check_consistency(&self) -> Vec<ConsistencyViolation> {
        let mut violations = vec![];
        for segment in self.network.segments() {
            for (idx, lane) in segment.lanes().iter().enumerate() {
                for (a, b) in lane.vehicles().iter().tuple_windows() {
                    let (leader, follower) = (&self.vehicles[*a], &self.vehicles[*b]);
                    if leader.pos() == follower.pos() {
                        violations.push(ConsistencyViolation::SharedPosition {
                            segment: segment.id(),
                            lane: idx,
                            pos: leader.pos(),
                        });
                        continue;
                    }
                    let gap = follower.gap_to(leader.pos(), leader);
                    if gap < -GAP_TOLERANCE {
                        violations.push(ConsistencyViolation::NegativeGap {
                            segment: segment.id(),
                            lane: idx,
                            leader: *a,
                            follower: *b,
                            gap,
                        });
                    }
                }
                // The first vehicle of the lane against the last one on the lane downstream
                let Some(&first) = lane.vehicles().first() else {
                    continue;
                };
                let follower = &self.vehicles[first];
                let leader = match self.network.leader(&self.vehicles, follower) {
                    Some(leader) if leader.id != first => leader,
                    _ => continue,
                };
                let gap = follower.gap_to(leader.pos, &self.vehicles[leader.id]);
                if gap < -GAP_TOLERANCE {
                    violations.push(ConsistencyViolation::NegativeGap {
                        segment: segment.id(),
                        lane: idx,
                        leader: leader.id,
                        follower: first,
                        gap,
                    });
                }
            }
        }
        violations
    }
}

/// The speed limit in force at a vehicle's position.
fn speed_limit_of(network: &RoadNetwork, vehicle: &Vehicle) -> f64 {
    network
        .segment(vehicle.segment())
        .map_or(f64::INFINITY, |s| s.speed_limit_at(vehicle.lane(), vehicle.pos()))
}

/// The speed limit at the upstream end of a lane.
fn segment_speed_limit(network: &RoadNetwork, segment: RoadSegmentId, lane: usize) -> f64 {
    network
        .segment(segment)
        .map_or(f64::INFINITY, |s| s.speed_limit_at(lane, 0.0))
}

/// The nearest traffic light ahead of a vehicle, on its own segment or
/// one link downstream, along with the distance to its stop line.
fn next_light<'a>(
    network: &RoadNetwork,
    lights: &'a LightSet,
    vehicle: &Vehicle,
) -> Option<(f64, &'a TrafficLight)> {
    let segment = network.segment(vehicle.segment())?;
    let pos = vehicle.pos();
    let on_segment = segment
        .lights()
        .iter()
        .filter_map(|id| lights.get(*id))
        .filter(|light| light.pos() > pos)
        .map(|light| (light.pos() - pos, light))
        .min_by(|a, b| a.0.total_cmp(&b.0));
    if on_segment.is_some() {
        return on_segment;
    }

    let next = segment.lane(vehicle.lane())?.downstream()?;
    let offset = segment.length() - pos;
    network
        .segment(next.segment)?
        .lights()
        .iter()
        .filter_map(|id| lights.get(*id))
        .map(|light| (offset + light.pos(), light))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Computes the acceleration of a vehicle from its leader, the speed limits
/// around it and the traffic light ahead.
fn longitudinal_acceleration(
    network: &RoadNetwork,
    vehicles: &VehicleSet,
    lights: &LightSet,
    vehicle: &Vehicle,
    dt: f64,
    rng: &mut dyn RngCore,
) -> f64 {
    let Some(segment) = network.segment(vehicle.segment()) else {
        return 0.0;
    };
    let pos = vehicle.pos();
    let limit = segment.speed_limit_at(vehicle.lane(), pos);
    let leader = network
        .leader(vehicles, vehicle)
        .map(|n| (n.rear(vehicles) - pos, vehicles[n.id].vel()));
    let mut acc = vehicle.calc_acceleration(leader, limit, dt, Some(rng));

    if let Some((at, next_limit)) = segment
        .lane(vehicle.lane())
        .and_then(|lane| lane.speed_limits().next_change(pos))
    {
        acc = vehicle.anticipate_speed_limit(acc, next_limit, at - pos);
    }

    if let Some((distance, light)) = next_light(network, lights, vehicle) {
        let stop = match light.status() {
            status if status.requires_stop() => true,
            LightStatus::GreenRed => vehicle.stopping_deceleration(distance) <= AMBER_MAX_DECEL,
            _ => false,
        };
        if stop {
            acc = acc.min(vehicle.calc_stop_acceleration(distance, limit, dt));
        }
    }
    acc
}
