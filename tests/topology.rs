//! Tests of networks built from a road topology with a junction.

use roadsim::{LaneRef, SimError, Simulation, SimulationConfig, Topology, VehiclePrototype};

/// A two-lane road forking at a junction. The left lane leads through
/// connecting road `c1` to `west`, the right lane through `c2` to `east`.
const FORK: &str = r#"{
    "roads": [
        { "name": "main", "length": 300.0, "right_lanes": 2 },
        { "name": "c1", "length": 30.0, "right_lanes": 1 },
        { "name": "c2", "length": 30.0, "right_lanes": 1 },
        { "name": "west", "length": 200.0, "right_lanes": 1 },
        { "name": "east", "length": 200.0, "right_lanes": 1 }
    ],
    "connections": [
        { "road_a": "c1", "end_a": "end", "road_b": "west", "end_b": "start" },
        { "road_a": "c2", "end_a": "end", "road_b": "east", "end_b": "start" }
    ],
    "junctions": [{
        "name": "fork",
        "connections": [
            {
                "incoming_road": "main", "incoming_end": "end",
                "connecting_road": "c1", "contact_point": "start",
                "lane_links": [[-1, -1]]
            },
            {
                "incoming_road": "main", "incoming_end": "end",
                "connecting_road": "c2", "contact_point": "start",
                "lane_links": [[-2, -1]]
            }
        ]
    }]
}"#;

fn fork() -> Simulation {
    let network = Topology::from_json(FORK).unwrap().build().unwrap();
    let mut sim = Simulation::new(network, SimulationConfig::default()).unwrap();
    sim.add_prototype(VehiclePrototype::default());
    sim
}

#[test]
fn builds_junction() {
    let sim = fork();
    let network = sim.network();
    assert_eq!(network.num_segments(), 5);
    assert_eq!(network.links().len(), 4);

    let id = |name: &str| network.segment_id(name).unwrap();
    let main = network.segment(id("main")).unwrap();
    assert_eq!(main.lane(0).unwrap().downstream(), Some(LaneRef::new(id("c1"), 0)));
    assert_eq!(main.lane(1).unwrap().downstream(), Some(LaneRef::new(id("c2"), 0)));
    assert!(main.sink().is_none());
    assert!(network.segment(id("west")).unwrap().sink().is_some());
    assert!(network.segment(id("east")).unwrap().sink().is_some());
}

/// A vehicle heading east moves into the right lane and leaves through `east`.
#[test]
fn follows_route_through_junction() {
    let mut sim = fork();
    let main = sim.network().segment_id("main").unwrap();
    let id = sim.add_vehicle("car", LaneRef::new(main, 0), 20.0, 10.0).unwrap();
    sim.set_vehicle_destination(id, "east").unwrap();

    let c2 = sim.network().segment_id("c2").unwrap();
    let east = sim.network().segment_id("east").unwrap();
    assert_eq!(sim.vehicle(id).unwrap().route(), Some(&[main, c2, east][..]));

    sim.run_until(60.0).unwrap();
    assert!(sim.vehicle(id).is_none());

    let sink_count = |name: &str| {
        let segment = sim.network().segment_id(name).unwrap();
        sim.network().segment(segment).unwrap().sink().unwrap().count()
    };
    assert_eq!(sink_count("east"), 1);
    assert_eq!(sink_count("west"), 0);
}

#[test]
fn rejects_bad_destinations() {
    let mut sim = fork();
    let c2 = sim.network().segment_id("c2").unwrap();
    let id = sim.add_vehicle("car", LaneRef::new(c2, 0), 10.0, 0.0).unwrap();

    assert!(matches!(
        sim.set_vehicle_destination(id, "north"),
        Err(SimError::UnknownSegment(_))
    ));
    assert!(matches!(
        sim.set_vehicle_destination(id, "west"),
        Err(SimError::NoRoute { .. })
    ));
    assert!(sim.vehicle(id).unwrap().route().is_none());
}
