//! Consumer-side main loop.
//!
//! One iteration: refresh the time mapping, drain the shared ring, feed the
//! capture buffer and the live telemetry stream, tick the state machine,
//! poll the capture job, then dispatch any pending commands. The loop runs
//! much faster than the acquisition rate, so each drain moves a small batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::CaptureBuffer;
use crate::command::{Command, CommandSource};
use crate::diagnostics::SpacingStats;
use crate::fsm::StateMachine;
use crate::io::EndStops;
use crate::ring::{RingConsumer, MAX_FETCH};
use crate::sample::Sample;
use crate::telemetry::emitter::{StatusFlags, TelemetryEmitter};
use crate::timebase::clock::MicrosClock;
use crate::timebase::mapper::TimeMapper;
use crate::timebase::ntp::AnchorSource;
use bytemuck::Zeroable;

/// Iterations between periodic status log lines.
const STATUS_LOG_INTERVAL: u64 = 20_000;

pub struct Supervisor {
    consumer: RingConsumer,
    fsm: StateMachine,
    capture: CaptureBuffer,
    emitter: TelemetryEmitter,
    mapper: TimeMapper,
    anchor_source: Box<dyn AnchorSource>,
    commands: Box<dyn CommandSource>,
    end_stops: Arc<dyn EndStops>,
    clock: Arc<dyn MicrosClock>,
    ntp_timeout: Duration,
    drain_buf: Vec<Sample>,
    spacing: SpacingStats,
    iterations: u64,
    drained_total: u64,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: RingConsumer,
        fsm: StateMachine,
        capture: CaptureBuffer,
        emitter: TelemetryEmitter,
        mapper: TimeMapper,
        anchor_source: Box<dyn AnchorSource>,
        commands: Box<dyn CommandSource>,
        end_stops: Arc<dyn EndStops>,
        clock: Arc<dyn MicrosClock>,
        ntp_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            fsm,
            capture,
            emitter,
            mapper,
            anchor_source,
            commands,
            end_stops,
            clock,
            ntp_timeout,
            drain_buf: vec![Sample::zeroed(); MAX_FETCH],
            spacing: SpacingStats::new(),
            iterations: 0,
            drained_total: 0,
        }
    }

    /// One full supervisor cycle.
    pub fn run_iteration(&mut self) {
        self.mapper
            .maybe_resync(&*self.clock, &mut *self.anchor_source, self.ntp_timeout);

        let n = self.consumer.drain(&mut self.drain_buf);
        self.drained_total += n as u64;
        let batch = &self.drain_buf[..n];
        for sample in batch {
            self.spacing.push(sample);
        }
        self.capture.ingest_bulk(batch);

        let status = self.status_flags();
        self.emitter
            .add_samples_bulk(batch, status, &self.mapper, &*self.clock);
        self.emitter.flush(&self.mapper, &*self.clock);

        self.fsm.update();

        let status = self.status_flags();
        self.capture
            .poll(&mut self.emitter, status, &self.mapper, &*self.clock);

        while let Some(command) = self.commands.poll_command() {
            self.dispatch(command);
        }

        self.iterations += 1;
        if self.iterations % STATUS_LOG_INTERVAL == 0 {
            self.log_status();
        }
    }

    /// Run until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!("supervisor running");
        while !shutdown.load(Ordering::Relaxed) {
            self.run_iteration();
        }
        info!(iterations = self.iterations, "supervisor stopped");
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Arm => self.fsm.request_arm(),
            Command::Fire => self.fsm.trigger_fire(),
            Command::Disarm => self.fsm.request_disarm(),
            Command::ManualActuator(mv) => {
                self.fsm.manual_actuator(mv);
            }
            Command::ManualEmOn => {
                self.fsm.manual_em(true);
            }
            Command::ManualEmOff => {
                self.fsm.manual_em(false);
            }
            Command::ManualModeEnable => self.fsm.enable_manual_mode(),
            Command::ManualModeDisable => self.fsm.disable_manual_mode(),
            Command::HoldModeEnable => self.fsm.enable_hold_after_fire(),
            Command::HoldModeDisable => self.fsm.disable_hold_after_fire(),
            Command::Collect { start, stop } => {
                if let Err(e) = self.capture.open_job(start as i64, stop as i64) {
                    warn!(error = %e, "collect command rejected");
                }
            }
        }
    }

    fn status_flags(&self) -> StatusFlags {
        let (a_engaged, b_engaged) = self.end_stops.read_both();
        StatusFlags {
            ready: self.fsm.is_ready(),
            em: self.fsm.is_em_active(),
            msw_a: !a_engaged,
            msw_b: !b_engaged,
            manual: self.fsm.is_manual_mode(),
            hold: self.fsm.is_hold_after_fire(),
        }
    }

    fn log_status(&self) {
        info!(
            state = self.fsm.state_name(),
            error_flags = self.fsm.error_flags(),
            overruns = self.consumer.overruns(),
            drained = self.drained_total,
            capture_head = self.capture.head(),
            gathering = self.capture.job_active(),
            datagrams = self.emitter.datagrams_sent(),
            spacing_us = self.spacing.average_spacing_us().unwrap_or(0),
            time_synced = self.mapper.ready(),
            "status"
        );
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.fsm
    }

    pub fn capture(&self) -> &CaptureBuffer {
        &self.capture
    }

    pub fn mapper(&self) -> &TimeMapper {
        &self.mapper
    }

    pub fn drained_total(&self) -> u64 {
        self.drained_total
    }
}
