//! Tests of lane changing on multi-lane segments.

use roadsim::{
    LaneChangeConfig, LaneChangeMode, LaneChangeModel, LaneRef, LaneType, RoadNetwork,
    RoadSegmentAttributes, RoadSegmentId, Simulation, SimulationConfig, VehiclePrototype,
};

fn two_lanes(lane_types: Vec<LaneType>, mode: LaneChangeMode) -> (Simulation, RoadSegmentId) {
    let mut network = RoadNetwork::new();
    let segment = network
        .add_segment(&RoadSegmentAttributes {
            name: "main".into(),
            length: 2000.0,
            lanes: 2,
            lane_types,
            ..Default::default()
        })
        .unwrap();
    let config = SimulationConfig {
        lane_change: LaneChangeConfig {
            mode,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sim = Simulation::new(network, config).unwrap();
    sim.add_prototype(VehiclePrototype::default());
    (sim, segment)
}

/// A vehicle stuck behind a slow leader overtakes when the left lane is clear.
#[test]
fn overtakes_slow_leader() {
    let (mut sim, segment) = two_lanes(vec![], LaneChangeMode::Gradual { duration: 3.0 });
    // The slow vehicle only changes lanes for its own benefit, so it stays put
    sim.add_prototype(VehiclePrototype {
        label: "slow".into(),
        lane_change: LaneChangeModel {
            politeness: 0.0,
            ..Default::default()
        },
        ..Default::default()
    });
    let left = LaneRef::new(segment, 0);
    let right = LaneRef::new(segment, 1);
    sim.add_vehicle("car", left, 10.0, 15.0).unwrap();
    sim.add_vehicle("car", left, 500.0, 30.0).unwrap();
    let slow = sim.add_vehicle("slow", right, 130.0, 5.0).unwrap();
    let ego = sim.add_vehicle("car", right, 100.0, 15.0).unwrap();

    let mut changed_at = None;
    for tick in 0..20 {
        sim.step().unwrap();
        assert_eq!(sim.vehicle(slow).unwrap().lane(), 1);
        let vehicle = sim.vehicle(ego).unwrap();
        if vehicle.lane() == 0 {
            changed_at = Some(tick);
            assert!(vehicle.is_changing_lanes());
            assert!(vehicle.lateral_offset() > 0.0);
            // Moving left, towards the centre of the new lane
            assert!(vehicle.lateral_speed() < 0.0);
            let snapshot = sim.snapshot();
            let moving = snapshot.vehicles().find(|v| v.id == ego).unwrap();
            assert_eq!(moving.lateral_speed, vehicle.lateral_speed());
            break;
        }
    }
    assert!(changed_at.is_some(), "no lane change within 20 ticks");
    assert_eq!(sim.vehicle(slow).unwrap().lane(), 1);

    // The lateral transition completes within its duration
    sim.run_until(sim.time() + 3.2).unwrap();
    let vehicle = sim.vehicle(ego).unwrap();
    assert!(!vehicle.is_changing_lanes());
    assert_eq!(vehicle.lateral_offset(), 0.0);
}

/// A vehicle does not cut in front of a close follower in the target lane.
#[test]
fn respects_safety_criterion() {
    let (mut sim, segment) = two_lanes(vec![], LaneChangeMode::Immediate);
    let left = LaneRef::new(segment, 0);
    let right = LaneRef::new(segment, 1);
    // A fast follower right beside the vehicle
    sim.add_vehicle("car", left, 97.0, 30.0).unwrap();
    sim.add_vehicle("car", right, 130.0, 5.0).unwrap();
    let ego = sim.add_vehicle("car", right, 100.0, 15.0).unwrap();

    sim.step().unwrap();
    assert_eq!(sim.vehicle(ego).unwrap().lane(), 1);
}

/// Vehicles in an entrance lane merge into the traffic lane before it ends.
#[test]
fn ramp_merge() {
    let (mut sim, segment) = two_lanes(
        vec![LaneType::Traffic, LaneType::Entrance],
        LaneChangeMode::Immediate,
    );
    let main = LaneRef::new(segment, 0);
    let ramp = LaneRef::new(segment, 1);
    for pos in [60.0, 180.0, 300.0] {
        sim.add_vehicle("car", main, pos, 20.0).unwrap();
    }
    let merging = [
        sim.add_vehicle("car", ramp, 150.0, 20.0).unwrap(),
        sim.add_vehicle("car", ramp, 100.0, 20.0).unwrap(),
    ];

    sim.run_until(40.0).unwrap();
    for id in merging {
        if let Some(vehicle) = sim.vehicle(id) {
            assert_eq!(vehicle.lane(), 0);
        }
    }
    // Only the obstacle closing off the entrance lane remains in it
    let lane = sim.network().lane(ramp).unwrap();
    assert_eq!(lane.len(), 1);
    assert!(sim.vehicle(lane.vehicles()[0]).unwrap().is_obstacle());
}

/// A vehicle in a lane blocked by an obstacle changes lanes to get around it.
#[test]
fn avoids_lane_closure() {
    let (mut sim, segment) = two_lanes(vec![], LaneChangeMode::Immediate);
    let right = LaneRef::new(segment, 1);
    sim.add_obstacle(right, 400.0, 50.0).unwrap();
    let ego = sim.add_vehicle("car", right, 100.0, 20.0).unwrap();

    sim.run_until(30.0).unwrap();
    let vehicle = sim.vehicle(ego).unwrap();
    assert!(vehicle.pos() > 400.0);
    assert_eq!(vehicle.lane(), 0);
}
