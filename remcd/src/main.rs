//! Switch controller daemon.
//!
//! Spins up the two halves of the pipeline on dedicated threads: the
//! fixed-cadence sampler and the supervisor that streams telemetry, services
//! capture jobs, runs the arm/fire sequence, and listens for commands.

mod gpio;
mod net;
mod sim;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use remc_core::capture::CaptureBuffer;
use remc_core::config::ControllerConfig;
use remc_core::fsm::StateMachine;
use remc_core::io::mock::EndStopCell;
use remc_core::io::{EndStops, SwitchOutputs};
use remc_core::ring::SharedRing;
use remc_core::sampler::Sampler;
use remc_core::supervisor::Supervisor;
use remc_core::telemetry::TelemetryEmitter;
use remc_core::timebase::mapper::TimeMapper;
use remc_core::timebase::{MicrosClock, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "remcd", about = "Rapid electromechanical switch controller daemon")]
struct Args {
    /// Path to a JSON config file (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive real GPIO lines instead of the built-in simulation.
    #[arg(long)]
    gpio: bool,

    /// Log verbosity.
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    info!(
        telemetry = %config.network.telemetry_group,
        commands = %config.network.command_group,
        ntp = %config.network.ntp_server,
        rate_hz = config.timing.sample_rate_hz,
        gpio = args.gpio,
        "controller starting"
    );

    let clock: Arc<dyn MicrosClock> = Arc::new(SystemClock::new());
    let (ring_tx, ring_rx) = SharedRing::with_capacity(config.capture.ring_capacity);

    // Hardware seams: real GPIO when requested, otherwise the simulation
    // that ships with the core mocks.
    let (outputs, end_stops): (Box<dyn SwitchOutputs>, Arc<dyn EndStops>) = if args.gpio {
        (
            Box::new(gpio::GpioSwitchOutputs::open(&config.gpio)?),
            Arc::new(gpio::GpioEndStops::open(&config.gpio)?),
        )
    } else {
        (
            Box::new(remc_core::io::mock::MockOutputs::new(
                remc_core::io::mock::OutputProbe::new(),
            )),
            EndStopCell::new(),
        )
    };

    let fsm = StateMachine::new(Arc::clone(&clock), outputs, end_stops.clone());
    let capture = CaptureBuffer::new(
        config.capture.storage_capacity,
        config.capture.window_start,
        config.capture.window_stop,
    );
    let emitter = TelemetryEmitter::new(Box::new(net::MulticastSink::open(&config.network)?));
    let mapper = TimeMapper::new(config.timing.ntp_resync_interval_ms);
    let ntp = net::ntp_client(&config.network)?;
    let commands = net::CommandSocket::open(&config.network)?;

    let mut supervisor = Supervisor::new(
        ring_rx,
        fsm,
        capture,
        emitter,
        mapper,
        Box::new(ntp),
        Box::new(commands),
        end_stops,
        Arc::clone(&clock),
        Duration::from_millis(config.timing.ntp_timeout_ms),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let sampler_shutdown = Arc::clone(&shutdown);
    let sampler_clock = Arc::clone(&clock);
    let sample_rate = config.timing.sample_rate_hz;
    let sampler_thread = std::thread::Builder::new()
        .name("remc-sampler".into())
        .spawn(move || {
            let mut sampler = Sampler::new(
                ring_tx,
                Box::new(sim::SimulatedAnalogInputs::new()),
                sampler_clock,
                sample_rate,
            );
            sampler.run(&sampler_shutdown);
        })
        .context("failed to spawn sampler thread")?;

    // The supervisor owns this thread until the process is terminated.
    supervisor.run(&shutdown);

    sampler_thread
        .join()
        .map_err(|_| anyhow::anyhow!("sampler thread panicked"))?;
    Ok(())
}
