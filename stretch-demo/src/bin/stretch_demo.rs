use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use stretch_controller::{
    actuator_driver::{FaultPlan, SimulatedActuator},
    demo_script::demonstration_script,
    interrupt::Interrupt,
    robot_config::RobotConfig,
    sequence_guard::{GuardSettings, SequenceGuard},
};
use stretch_demo::{logging, script_file, signals};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Robot model, JSON or YAML. Uses the packaged Stretch model if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Step script, JSON or YAML. Runs the demonstration sequence if omitted
    #[arg(long)]
    script: Option<PathBuf>,

    /// Reject the n-th flush (zero based) in the simulator
    #[arg(long)]
    reject_flush: Option<usize>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose, args.json_logs);

    let config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::included(),
    };
    let script = match &args.script {
        Some(path) => script_file::load_script(path)?,
        None => demonstration_script(),
    };
    let faults = FaultPlan {
        reject_flush: args.reject_flush,
        ..Default::default()
    };

    let interrupt = Interrupt::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            match signals::escalate_signals(interrupt, tokio::signal::ctrl_c).await {
                Ok(()) => std::process::exit(signals::FORCED_EXIT_CODE.into()),
                Err(error) => tracing::error!("Failed to wait for Ctrl+c: {}", error),
            }
        }
    });

    let guard = SequenceGuard::new(GuardSettings::from_config(&config), interrupt);
    let report = guard
        .run(
            |resolver| resolver.resolve_script(&script),
            || SimulatedActuator::connect(&config, faults),
        )
        .await?;

    for failure in &report.teardown_failures {
        tracing::warn!("Teardown {:?} did not succeed: {}", failure.action, failure.reason);
    }
    println!("{}", report.outcome);
    Ok(ExitCode::from(report.outcome.exit_code()))
}
