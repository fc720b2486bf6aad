use anyhow::{bail, Context, Result};
use log::{error, info};
use roadsim::config::Scenario;
use roadsim::{SimulationSnapshot, Topology};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "roadsim", about = "Runs a microscopic road traffic simulation")]
struct Flags {
    /// Scenario file (JSON)
    #[structopt(parse(from_os_str))]
    scenario: PathBuf,

    /// Road network file (JSON)
    #[structopt(parse(from_os_str))]
    network: PathBuf,

    /// Only check that the network and scenario are valid
    #[structopt(long = "validate")]
    validate: bool,

    /// Build the simulation and report on it without running it
    #[structopt(long = "dry-run")]
    dry_run: bool,

    /// Override the scenario's random seed
    #[structopt(long = "seed")]
    seed: Option<u64>,

    /// Override the scenario's duration, in seconds
    #[structopt(long = "duration")]
    duration: Option<f64>,

    /// Write a snapshot per report interval to this file, one JSON object per line
    #[structopt(long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let flags = Flags::from_args();

    let network = std::fs::read_to_string(&flags.network)
        .with_context(|| format!("reading network {}", flags.network.display()))?;
    let topology = Topology::from_json(&network)
        .with_context(|| format!("parsing network {}", flags.network.display()))?;
    let scenario = std::fs::read_to_string(&flags.scenario)
        .with_context(|| format!("reading scenario {}", flags.scenario.display()))?;
    let mut scenario = Scenario::from_json(&scenario)
        .with_context(|| format!("parsing scenario {}", flags.scenario.display()))?;

    if let Some(seed) = flags.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(duration) = flags.duration {
        scenario.duration = duration;
    }
    if scenario.duration.is_nan() || scenario.duration < 0.0 {
        bail!("invalid duration {}", scenario.duration);
    }

    let mut sim = scenario.build(&topology).context("building simulation")?;

    if flags.validate {
        println!("{} and {} are valid", flags.network.display(), flags.scenario.display());
        return Ok(());
    }
    if flags.dry_run {
        let network = sim.network();
        println!("segments:  {}", network.num_segments());
        println!("links:     {}", network.links().len());
        println!("vehicles:  {}", sim.num_vehicles());
        println!("lights:    {}", sim.iter_lights().count());
        println!(
            "run:       {} s at dt = {} s ({} steps)",
            scenario.duration,
            sim.config().timestep,
            (scenario.duration / sim.config().timestep).round()
        );
        return Ok(());
    }

    if scenario.report_interval > 0.0 {
        sim.subscribe(
            scenario.report_interval,
            Box::new(|snapshot: &SimulationSnapshot| {
                info!(
                    "t = {:>8.1} s: {} vehicles, {} removed",
                    snapshot.time,
                    snapshot.vehicles().filter(|v| !v.is_obstacle).count(),
                    snapshot.removed()
                );
            }),
        );
    }
    if let Some(path) = &flags.output {
        let interval = match scenario.report_interval {
            t if t > 0.0 => t,
            _ => sim.config().timestep,
        };
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        sim.subscribe(
            interval,
            Box::new(move |snapshot: &SimulationSnapshot| {
                let result = serde_json::to_writer(&mut writer, snapshot)
                    .map_err(std::io::Error::from)
                    .and_then(|_| writeln!(writer))
                    .and_then(|_| writer.flush());
                if let Err(err) = result {
                    error!("writing snapshot: {err}");
                }
            }),
        );
    }

    info!("running for {} s", scenario.duration);
    let start = Instant::now();
    let steps = sim.run_until(scenario.duration)?;
    let elapsed = start.elapsed();

    let snapshot = sim.snapshot();
    info!(
        "simulated {} steps in {:?} ({:.0}x real time)",
        steps,
        elapsed,
        sim.time() / elapsed.as_secs_f64().max(1e-9)
    );
    for source in &snapshot.sources {
        println!(
            "source {:<20} inserted {:>6}  queued {:>4}",
            source.segment_name, source.inserted, source.queue_len
        );
    }
    for sink in &snapshot.sinks {
        println!(
            "sink   {:<20} removed  {:>6}  mean travel time {:>7.1} s",
            sink.segment_name,
            sink.count,
            if sink.count > 0 {
                sink.total_time / sink.count as f64
            } else {
                0.0
            }
        );
    }
    Ok(())
}
