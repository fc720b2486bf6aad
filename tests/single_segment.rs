//! Tests that involve the simulation of a single road segment.

use assert_approx_eq::assert_approx_eq;
use roadsim::config::Scenario;
use roadsim::{
    Gipps, Kca, Krauss, LaneRef, ModelParams, Nsm, OptimalVelocity, RoadNetwork,
    RoadSegmentAttributes, RoadSegmentId, ScheduledVehicle, SimError, Simulation,
    SimulationConfig, SimulationSnapshot, Topology, TrafficLight, TrafficSource, VehicleId,
    VehiclePrototype,
};
use std::cell::RefCell;
use std::rc::Rc;

fn single_segment(length: f64, lanes: usize) -> (Simulation, RoadSegmentId) {
    with_config(length, lanes, SimulationConfig::default())
}

fn with_config(length: f64, lanes: usize, config: SimulationConfig) -> (Simulation, RoadSegmentId) {
    let mut network = RoadNetwork::new();
    let segment = network
        .add_segment(&RoadSegmentAttributes {
            name: "main".into(),
            length,
            lanes,
            ..Default::default()
        })
        .unwrap();
    let mut sim = Simulation::new(network, config).unwrap();
    sim.add_prototype(VehiclePrototype::default());
    (sim, segment)
}

fn prototype(label: &str, model: ModelParams) -> VehiclePrototype {
    VehiclePrototype {
        label: label.into(),
        model,
        ..Default::default()
    }
}

/// The net gap between the rear of `leader` and the front of `follower`.
fn gap(sim: &Simulation, leader: VehicleId, follower: VehicleId) -> f64 {
    let leader = sim.vehicle(leader).unwrap();
    leader.pos() - leader.effective_length() - sim.vehicle(follower).unwrap().pos()
}

/// Checks that every lane is sorted by strictly decreasing position,
/// that no vehicles overlap and that no vehicle reverses.
fn check_invariants(snapshot: &SimulationSnapshot) {
    for lane in &snapshot.lanes {
        for pair in lane.vehicles.windows(2) {
            assert!(pair[0].pos > pair[1].pos, "lane order broken at t = {}", snapshot.time);
        }
    }
    for vehicle in snapshot.vehicles() {
        assert!(vehicle.vel >= 0.0, "negative speed at t = {}", snapshot.time);
    }
}

/// Test that a vehicle's position increases monotonically.
#[test]
fn vehicle_drives_forward() {
    let (mut sim, segment) = single_segment(10_000.0, 1);
    let id = sim.add_vehicle("car", LaneRef::new(segment, 0), 0.0, 0.0).unwrap();

    let mut pos = sim.vehicle(id).unwrap().pos();
    for _ in 0..100 {
        sim.step().unwrap();
        let vehicle = sim.vehicle(id).unwrap();
        assert!(vehicle.pos() > pos);
        assert!(vehicle.crossed(vehicle.pos() - 1e-3));
        pos = vehicle.pos();
    }
}

/// Test that a follower approaching a stationary obstacle settles at the minimum gap.
#[test]
fn follower_settles_behind_obstacle() {
    let (mut sim, segment) = single_segment(1000.0, 1);
    let lane = LaneRef::new(segment, 0);
    sim.add_obstacle(lane, 500.0, 5.0).unwrap();
    let id = sim.add_vehicle("car", lane, 100.0, 0.0).unwrap();

    let mut pos = 100.0;
    for _ in 0..1500 {
        sim.step().unwrap();
        let vehicle = sim.vehicle(id).unwrap();
        let gap = 495.0 - vehicle.pos();
        assert!(gap > 1.5, "gap fell to {gap}");
        assert!(vehicle.pos() >= pos - 1e-9);
        pos = vehicle.pos();
    }
    let vehicle = sim.vehicle(id).unwrap();
    assert!(vehicle.vel() < 0.1);
    assert!((495.0 - vehicle.pos() - 2.0).abs() < 1.0);
}

/// Test the inflow and outflow of a single lane fed at 1800 veh/h.
#[test]
fn inflow_reaches_sink() {
    let topology = Topology::from_json(
        r#"{ "roads": [{ "name": "main", "length": 1000.0, "right_lanes": 1 }] }"#,
    )
    .unwrap();
    let scenario = Scenario::from_json(
        r#"{
            "simulation": { "timestep": 0.2, "seed": 1 },
            "duration": 600.0,
            "prototypes": [
                { "label": "car", "model": { "type": "idm", "v0": 30.0, "t": 1.5, "s0": 2.0, "a": 1.0, "b": 1.5 } }
            ],
            "sources": [{
                "road": "main",
                "inflow": { "type": "flow", "samples": [{ "time": 0.0, "flow": 1800.0, "speed": 20.0 }] }
            }]
        }"#,
    )
    .unwrap();
    let mut sim = scenario.build(&topology).unwrap();

    let samples = Rc::new(RefCell::new(0));
    let counter = samples.clone();
    sim.subscribe(
        1.0,
        Box::new(move |snapshot: &SimulationSnapshot| {
            check_invariants(snapshot);
            *counter.borrow_mut() += 1;
        }),
    );
    sim.run_until(scenario.duration).unwrap();

    let segment = sim.network().segment_id("main").unwrap();
    let segment = sim.network().segment(segment).unwrap();
    let removed = segment.sink().unwrap().count();
    let inserted = segment.source().unwrap().inserted();
    assert!((295..=301).contains(&inserted), "inserted {inserted}");
    // The vehicles on the road at the end are the startup transient
    assert!(removed >= 260 && removed <= inserted, "removed {removed}");
    assert_eq!(removed + sim.num_vehicles(), inserted);
    assert_eq!(*samples.borrow(), 600);
}

/// Test that a vehicle stops at a red light and drives on once it turns green.
#[test]
fn red_light_stops_traffic() {
    let (mut sim, segment) = single_segment(1000.0, 1);
    // Red (then red-amber) until t = 20
    let light = TrafficLight::new(segment, 150.0, [20.0, 3.0, 20.0, 2.0], 25.0);
    sim.add_traffic_light(light).unwrap();
    let id = sim.add_vehicle("car", LaneRef::new(segment, 0), 0.0, 10.0).unwrap();

    while sim.time() < 19.9 {
        sim.step().unwrap();
        assert!(sim.vehicle(id).unwrap().pos() < 150.0);
    }

    sim.run_until(40.0).unwrap();
    assert!(sim.vehicle(id).unwrap().pos() > 150.0);
}

/// Test that a light's phase repeats after each cycle, for any offset.
#[test]
fn light_cycle_is_periodic() {
    let (mut sim, segment) = single_segment(100.0, 1);
    for offset in [0.5, 13.1, 27.7, -8.3] {
        sim.add_traffic_light(TrafficLight::new(segment, 50.0, [30.0, 3.0, 25.0, 2.0], offset))
            .unwrap();
    }
    let before = sim
        .iter_lights()
        .map(|(_, light)| light.phase())
        .collect::<Vec<_>>();
    sim.run_until(60.0).unwrap();
    let after = sim
        .iter_lights()
        .map(|(_, light)| light.phase())
        .collect::<Vec<_>>();
    for ((s1, e1), (s2, e2)) in before.into_iter().zip(after) {
        assert_eq!(s1, s2);
        assert_approx_eq!(e1, e2, 1e-6);
    }
}

/// Test that a follower never runs into its leader, for every acceleration model.
#[test]
fn models_keep_their_distance() {
    let models = [
        ModelParams::Gipps(Gipps::default()),
        ModelParams::Krauss(Krauss::default()),
        ModelParams::Ovm(OptimalVelocity::default()),
        ModelParams::Nsm(Nsm::default()),
        ModelParams::Kca(Kca::default()),
    ];
    for model in models {
        let (mut sim, segment) = single_segment(8000.0, 1);
        sim.add_prototype(prototype("test", model.clone()));
        let lane = LaneRef::new(segment, 0);
        let leader = sim.add_vehicle("test", lane, 200.0, 10.0).unwrap();
        let follower = sim.add_vehicle("test", lane, 150.0, 10.0).unwrap();

        while sim.time() < 120.0 {
            sim.step().unwrap();
            check_invariants(&sim.snapshot());
            let gap = gap(&sim, leader, follower);
            assert!(gap >= 0.0, "{model:?}: gap {gap} at t = {}", sim.time());
        }
        assert!(sim.vehicle(follower).unwrap().pos() > 1000.0, "{model:?} barely moved");
    }
}

/// Test that cellular vehicles stop behind an obstacle when the simulation
/// step is longer than their update interval.
#[test]
fn cellular_models_with_long_step() {
    let models = [
        ModelParams::Nsm(Nsm {
            p_slowdown: 0.0,
            p_slow_to_start: 0.0,
            ..Default::default()
        }),
        ModelParams::Kca(Kca::default()),
    ];
    for model in models {
        let config = SimulationConfig {
            timestep: 2.0,
            ..Default::default()
        };
        let (mut sim, segment) = with_config(1000.0, 1, config);
        sim.add_prototype(prototype("test", model.clone()));
        let lane = LaneRef::new(segment, 0);
        let obstacle = sim.add_obstacle(lane, 100.0, 5.0).unwrap();
        let id = sim.add_vehicle("test", lane, 71.0, 7.5).unwrap();

        for _ in 0..30 {
            sim.step().unwrap();
            check_invariants(&sim.snapshot());
            let gap = gap(&sim, obstacle, id);
            assert!(gap >= 0.0, "{model:?}: gap {gap} at t = {}", sim.time());
        }
        let vehicle = sim.vehicle(id).unwrap();
        assert!(vehicle.pos() > 85.0, "{model:?} stopped at {}", vehicle.pos());
        assert!(vehicle.vel() < 1e-9);
    }
}

/// Test that scheduled vehicles enter on the requested lanes at their times.
#[test]
fn schedule_source_inserts_vehicles() {
    let (mut sim, segment) = single_segment(1000.0, 2);
    let entry = |time: f64, lane: Option<usize>| ScheduledVehicle {
        time,
        label: "car".into(),
        lane,
        speed: Some(10.0),
        destination: None,
    };
    let source = TrafficSource::schedule(vec![
        entry(5.0, None),
        entry(1.0, Some(1)),
        entry(1.0, Some(0)),
    ]);
    sim.add_source(segment, source).unwrap();

    sim.run_until(0.5).unwrap();
    assert_eq!(sim.num_vehicles(), 0);

    sim.run_until(2.0).unwrap();
    let mut lanes = sim.iter_vehicles().map(|v| v.lane()).collect::<Vec<_>>();
    lanes.sort_unstable();
    assert_eq!(lanes, [0, 1]);

    sim.run_until(10.0).unwrap();
    assert_eq!(sim.num_vehicles(), 3);
    let source = sim.network().segment(segment).unwrap().source().unwrap();
    assert_eq!(source.inserted(), 3);
    assert_eq!(source.queue_len(), 0);
}

/// Test that a schedule naming a lane the segment does not have is rejected.
#[test]
fn schedule_source_rejects_missing_lane() {
    let (mut sim, segment) = single_segment(1000.0, 2);
    let source = TrafficSource::schedule(vec![ScheduledVehicle {
        time: 1.0,
        label: "car".into(),
        lane: Some(5),
        speed: None,
        destination: None,
    }]);
    assert!(matches!(sim.add_source(segment, source), Err(SimError::Config(_))));
    assert!(sim.network().segment(segment).unwrap().source().is_none());
}
