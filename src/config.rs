//! Scenario files, which describe everything placed on a road network before the first tick.
//!
//! A scenario refers to road segments by name. The segment carrying traffic along
//! a road's direction of definition is named after the road; the opposite one is
//! suffixed with [`REVERSE_SUFFIX`](crate::REVERSE_SUFFIX).

use crate::{
    InflowSample, InflowTimeSeries, LaneRef, RoadSegmentId, ScheduledVehicle, SimError,
    Simulation, SimulationConfig, SpeedLimits, Topology, TrafficComposition, TrafficLight,
    TrafficSink, TrafficSource, VehiclePrototype,
};
use log::info;
use serde::{Deserialize, Serialize};

/// The default window over which sinks measure outflow, in s.
const DEFAULT_SINK_WINDOW: f64 = 300.0; // s

/// A complete simulation scenario.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub simulation: SimulationConfig,
    /// The simulated duration in s.
    pub duration: f64,
    /// The interval at which progress is reported, in s. Zero disables reporting.
    pub report_interval: f64,
    /// The vehicle types. If empty, a single default "car" type is used.
    pub prototypes: Vec<VehiclePrototype>,
    pub sources: Vec<SourceConfig>,
    pub sinks: Vec<SinkConfig>,
    pub lights: Vec<LightConfig>,
    pub speed_limits: Vec<SpeedLimitConfig>,
    pub obstacles: Vec<ObstacleConfig>,
    /// Vehicles present on the network at the start.
    pub vehicles: Vec<VehicleConfig>,
}

/// A source at the upstream end of a segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    pub road: String,
    pub inflow: InflowConfig,
}

/// How a source generates vehicles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InflowConfig {
    /// A time-varying flow of vehicles drawn from a mix of types.
    Flow {
        samples: Vec<InflowSample>,
        #[serde(default)]
        composition: Vec<CompositionEntry>,
    },
    /// Individually scheduled vehicles.
    Schedule { vehicles: Vec<ScheduledVehicle> },
}

/// The share of one vehicle type in a traffic mix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositionEntry {
    pub label: String,
    pub fraction: f64,
}

/// An explicit sink at the downstream end of a segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkConfig {
    pub road: String,
    /// The window over which the outflow rate is measured, in s.
    #[serde(default = "default_sink_window")]
    pub window: f64,
}

fn default_sink_window() -> f64 {
    DEFAULT_SINK_WINDOW
}

/// A fixed-time traffic light.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightConfig {
    pub road: String,
    /// The position of the stop line, in m.
    pub pos: f64,
    pub green: f64,
    pub amber: f64,
    pub red: f64,
    #[serde(default)]
    pub red_amber: f64,
    /// The phase shift in s.
    #[serde(default)]
    pub offset: f64,
}

/// Speed limits on one lane, or on all lanes of a segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeedLimitConfig {
    pub road: String,
    #[serde(default)]
    pub lane: Option<usize>,
    pub limits: SpeedLimits,
}

/// A stationary obstacle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub road: String,
    pub lane: usize,
    /// The position of the obstacle's downstream end, in m.
    pub pos: f64,
    pub length: f64,
}

/// A vehicle present on the network at the start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub label: String,
    pub road: String,
    pub lane: usize,
    /// The position of the front of the vehicle, in m.
    pub pos: f64,
    #[serde(default)]
    pub speed: f64,
    /// The name of the segment the vehicle is heading to.
    #[serde(default)]
    pub destination: Option<String>,
}

impl Scenario {
    /// Parses a scenario from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builds the road network from `topology` and places the scenario on it.
    pub fn build(&self, topology: &Topology) -> Result<Simulation, SimError> {
        let network = topology.build()?;
        let mut sim = Simulation::new(network, self.simulation.clone())?;

        if self.prototypes.is_empty() {
            sim.add_prototype(VehiclePrototype::default());
        }
        for prototype in &self.prototypes {
            sim.add_prototype(prototype.clone());
        }

        for cfg in &self.speed_limits {
            let segment = segment_id(&sim, &cfg.road)?;
            let lanes = match cfg.lane {
                Some(lane) => vec![lane],
                None => (0..sim.network().segment(segment).map_or(0, |s| s.num_lanes())).collect(),
            };
            for lane in lanes {
                sim.set_speed_limits(LaneRef::new(segment, lane), cfg.limits.clone())?;
            }
        }

        for cfg in &self.lights {
            let segment = segment_id(&sim, &cfg.road)?;
            let durations = [cfg.green, cfg.amber, cfg.red, cfg.red_amber];
            sim.add_traffic_light(TrafficLight::new(segment, cfg.pos, durations, cfg.offset))?;
        }

        for cfg in &self.sinks {
            let segment = segment_id(&sim, &cfg.road)?;
            sim.add_sink(segment, TrafficSink::new(cfg.window))?;
        }

        for cfg in &self.sources {
            let segment = segment_id(&sim, &cfg.road)?;
            let source = match &cfg.inflow {
                InflowConfig::Flow {
                    samples,
                    composition,
                } => {
                    let composition = if composition.is_empty() {
                        let label = self.prototypes.first().map_or("car", |p| p.label.as_str());
                        TrafficComposition::single(label)
                    } else {
                        TrafficComposition::new(
                            composition
                                .iter()
                                .map(|e| (e.label.clone(), e.fraction))
                                .collect(),
                        )?
                    };
                    TrafficSource::flow(InflowTimeSeries::new(samples.clone()), composition)
                }
                InflowConfig::Schedule { vehicles } => TrafficSource::schedule(vehicles.clone()),
            };
            sim.add_source(segment, source)?;
        }

        for cfg in &self.obstacles {
            let segment = segment_id(&sim, &cfg.road)?;
            sim.add_obstacle(LaneRef::new(segment, cfg.lane), cfg.pos, cfg.length)?;
        }

        for cfg in &self.vehicles {
            let segment = segment_id(&sim, &cfg.road)?;
            let id = sim.add_vehicle(&cfg.label, LaneRef::new(segment, cfg.lane), cfg.pos, cfg.speed)?;
            if let Some(destination) = &cfg.destination {
                sim.set_vehicle_destination(id, destination)?;
            }
        }

        info!(
            "scenario: {} prototypes, {} sources, {} lights, {} initial vehicles",
            self.prototypes.len().max(1),
            self.sources.len(),
            self.lights.len(),
            self.vehicles.len()
        );
        Ok(sim)
    }
}

impl Topology {
    /// Parses a network topology from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn segment_id(sim: &Simulation, name: &str) -> Result<RoadSegmentId, SimError> {
    sim.network()
        .segment_id(name)
        .ok_or_else(|| SimError::UnknownSegment(name.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const NETWORK: &str = r#"{
        "roads": [
            { "name": "a", "length": 200.0, "right_lanes": 2 },
            { "name": "b", "length": 300.0, "right_lanes": 2 }
        ],
        "connections": [
            { "road_a": "a", "end_a": "end", "road_b": "b", "end_b": "start" }
        ]
    }"#;

    const SCENARIO: &str = r#"{
        "simulation": { "timestep": 0.1, "seed": 7, "consistency": "warn" },
        "duration": 120.0,
        "prototypes": [
            { "label": "car", "model": { "type": "idm", "v0": 33.0 } },
            { "label": "truck", "length": 12.0, "model": { "type": "gipps", "v0": 22.0 } }
        ],
        "sources": [
            {
                "road": "a",
                "inflow": {
                    "type": "flow",
                    "samples": [{ "time": 0.0, "flow": 1200.0, "speed": 25.0 }],
                    "composition": [
                        { "label": "car", "fraction": 0.8 },
                        { "label": "truck", "fraction": 0.2 }
                    ]
                }
            }
        ],
        "sinks": [{ "road": "b" }],
        "lights": [
            { "road": "b", "pos": 250.0, "green": 30.0, "amber": 3.0, "red": 20.0 }
        ],
        "speed_limits": [
            { "road": "a", "limits": { "default": 30.0, "changes": [[100.0, 20.0]] } }
        ],
        "vehicles": [
            { "label": "truck", "road": "a", "lane": 1, "pos": 50.0, "speed": 10.0, "destination": "b" }
        ]
    }"#;

    #[test]
    fn builds_scenario() {
        let topology = Topology::from_json(NETWORK).unwrap();
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_approx_eq!(scenario.duration, 120.0);
        assert_eq!(scenario.simulation.seed, 7);

        let sim = scenario.build(&topology).unwrap();
        assert_eq!(sim.num_vehicles(), 1);
        assert_eq!(sim.iter_lights().count(), 1);
        assert!(sim.prototype("truck").is_some());

        let a = sim.network().segment_id("a").unwrap();
        let segment = sim.network().segment(a).unwrap();
        assert!(segment.source().is_some());
        assert_approx_eq!(segment.speed_limit_at(0, 50.0), 30.0);
        assert_approx_eq!(segment.speed_limit_at(1, 150.0), 20.0);

        let vehicle = sim.iter_vehicles().next().unwrap();
        assert_eq!(vehicle.label(), "truck");
        assert_eq!(vehicle.route().map(|r| r.len()), Some(2));
    }

    #[test]
    fn unknown_road() {
        let topology = Topology::from_json(NETWORK).unwrap();
        let scenario = Scenario {
            sinks: vec![SinkConfig {
                road: "c".into(),
                window: 60.0,
            }],
            ..Default::default()
        };
        assert!(matches!(
            scenario.build(&topology),
            Err(SimError::UnknownSegment(name)) if name == "c"
        ));
    }

    #[test]
    fn unknown_label_in_composition() {
        let topology = Topology::from_json(NETWORK).unwrap();
        let scenario = Scenario {
            sources: vec![SourceConfig {
                road: "a".into(),
                inflow: InflowConfig::Flow {
                    samples: vec![],
                    composition: vec![CompositionEntry {
                        label: "bus".into(),
                        fraction: 1.0,
                    }],
                },
            }],
            ..Default::default()
        };
        assert!(matches!(
            scenario.build(&topology),
            Err(SimError::UnknownPrototype(_))
        ));
    }
}
