use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use env_logger::Builder;

use dslab_dfs::{DfsEngine, MetricKind, ScenarioConfig, TaskState};
use dslab_dfs_storage::{log_error, log_info};

/// Runs data transfer scenario in the simulated distributed file system
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML scenario
    scenario: String,

    /// Time slice in seconds (overrides the scenario value)
    #[clap(long)]
    step: Option<f64>,

    /// Path metric used by all tasks (hop_count, widest_bandwidth, bandwidth_latency, throughput, hierarchical)
    #[clap(long)]
    metric: Option<MetricKind>,

    /// Simulation time limit (overrides the scenario value)
    #[clap(long)]
    horizon: Option<f64>,

    /// Write final engine state as JSON to the given file
    #[clap(long)]
    export: Option<String>,
}

fn print_results(engine: &DfsEngine) {
    println!(
        "{:>4}  {:<10} {:<8} {:<24} {:>10} {:>10} {:>10} {:>12}  {}",
        "id", "client", "kind", "path", "size", "start", "finish", "throughput", "result"
    );
    for task in engine.tasks() {
        let result = match &task.state {
            TaskState::Failed(e) => format!("FAILED: {}", e),
            state => format!("{:?}", state).to_uppercase(),
        };
        let fmt_time = |t: Option<f64>| t.map_or("-".to_string(), |t| format!("{:.3}", t));
        println!(
            "{:>4}  {:<10} {:<8} {:<24} {:>10} {:>10} {:>10} {:>12}  {}",
            task.id,
            engine.topology().label(task.client),
            task.spec.kind,
            task.spec.path,
            task.size,
            fmt_time(task.start_time),
            fmt_time(task.finish_time),
            task.throughput().map_or("-".to_string(), |t| format!("{:.3}", t)),
            result
        );
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let mut config = match ScenarioConfig::from_file(&args.scenario) {
        Ok(config) => config,
        Err(e) => {
            log_error!(0., "driver", "{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(step) = args.step {
        config.step = step;
    }
    if let Some(horizon) = args.horizon {
        config.horizon = horizon;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
        for client in config.clients.iter_mut() {
            for task in client.tasks.iter_mut() {
                task.metric = None;
            }
        }
    }
    let (mut engine, driver) = match config.build() {
        Ok(built) => built,
        Err(e) => {
            log_error!(0., "driver", "{}", e);
            return ExitCode::FAILURE;
        }
    };

    let t = Instant::now();
    let end = driver.run(&mut engine);
    log_info!(end, "driver", "simulated in {:.2?}", t.elapsed());

    print_results(&engine);
    println!("\nSimulation time: {:.3}", end);

    if let Some(path) = args.export {
        let written = engine
            .export()
            .to_json()
            .and_then(|json| std::fs::write(&path, json).map_err(|e| dslab_dfs::DfsError::Config(e.to_string())));
        if let Err(e) = written {
            log_error!(end, "driver", "cannot export state to {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
