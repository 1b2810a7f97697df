//! Arm/fire state machine for the switch actuator.
//!
//! The machine drives the actuator, the retention electromagnet, the READY
//! line, and the end-stop mirror outputs. Timeouts set sticky error bits but
//! never force a transition: the actuator keeps driving so the sequence can
//! recover if an end stop eventually trips. Every sticky condition clears on
//! the transition back to idle (operator disarm included).
//!
//! `update()` is expected at 1 kHz or better from the supervisor loop. Each
//! update latches one end-stop snapshot and the whole cycle, including the
//! manual-mode interlocks, works from that snapshot.

use std::sync::Arc;

use tracing::{info, warn};

use crate::io::{ActuatorMove, EndStops, SwitchOutputs};
use crate::timebase::clock::MicrosClock;

/// Milliseconds the A end stop has to trip after arming starts.
pub const ARM_TIMEOUT_MS: u64 = 1000;
/// Milliseconds the B end stop has to trip after pull-back starts.
pub const PULLBACK_TIMEOUT_MS: u64 = 1000;
/// Settling pause between reaching the A end stop and pulling back.
pub const PAUSE_BEFORE_PULLBACK_MS: u64 = 500;

/// Sticky error bit positions, as carried in telemetry.
pub const ERR_BIT_ARM_TIMEOUT: u8 = 1 << 0;
pub const ERR_BIT_PULLBACK_TIMEOUT: u8 = 1 << 1;
pub const ERR_BIT_RETAIN_FAIL: u8 = 1 << 2;

/// Automatic-mode states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    ArmEngage,
    ArmPause,
    ArmPullback,
    ArmedReady,
    Firing,
    HoldAfterFire,
}

/// Coarse status byte for telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationalStatus {
    Idle = 0,
    Engaging = 1,
    PauseBeforePullback = 2,
    PullingBack = 3,
    Armed = 4,
    Firing = 5,
    Holding = 6,
    ManualMode = 7,
    Unknown = 8,
}

/// End-stop levels latched at the start of the last `update()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndStopSnapshot {
    /// A end stop engaged (line low).
    pub a_engaged: bool,
    /// B end stop engaged (line low).
    pub b_engaged: bool,
    /// Counter value when the snapshot was taken.
    pub read_us: u64,
}

pub struct StateMachine {
    clock: Arc<dyn MicrosClock>,
    outputs: Box<dyn SwitchOutputs>,
    end_stops: Arc<dyn EndStops>,

    state: SystemState,
    manual_mode: bool,
    hold_after_fire: bool,
    /// In hold-after-fire, set once the switch has visibly left the A end
    /// stop; the re-drive completes only after that.
    hold_drive_started: bool,

    em_output: bool,
    ready_output: bool,

    arm_pending: bool,
    fire_pending: bool,

    state_entered_ms: u64,
    pause_started_ms: u64,

    err_arm_timeout: bool,
    err_pullback_timeout: bool,
    err_retain_fail: bool,

    snapshot: EndStopSnapshot,
}

impl StateMachine {
    pub fn new(
        clock: Arc<dyn MicrosClock>,
        outputs: Box<dyn SwitchOutputs>,
        end_stops: Arc<dyn EndStops>,
    ) -> Self {
        let mut machine = Self {
            clock,
            outputs,
            end_stops,
            state: SystemState::Idle,
            manual_mode: false,
            hold_after_fire: false,
            hold_drive_started: false,
            em_output: false,
            ready_output: false,
            arm_pending: false,
            fire_pending: false,
            state_entered_ms: 0,
            pause_started_ms: 0,
            err_arm_timeout: false,
            err_pullback_timeout: false,
            err_retain_fail: false,
            snapshot: EndStopSnapshot::default(),
        };
        machine.reset_to_idle();
        machine
    }

    /// Request the arming sequence. Accepted only from idle in automatic
    /// mode; the transition happens on the next `update()`.
    pub fn request_arm(&mut self) {
        if self.manual_mode {
            info!("arm request ignored in manual mode");
            return;
        }
        if self.state == SystemState::Idle {
            self.arm_pending = true;
        }
    }

    /// Force a full reset to idle from any state, clearing sticky errors.
    pub fn request_disarm(&mut self) {
        info!("disarm request");
        self.state = SystemState::Idle;
        self.reset_to_idle();
    }

    /// Fire the armed switch. Accepted only while armed in automatic mode;
    /// the transition happens on the next `update()`.
    pub fn trigger_fire(&mut self) {
        if self.manual_mode {
            info!("fire request ignored in manual mode");
            return;
        }
        if self.state == SystemState::ArmedReady {
            self.fire_pending = true;
        }
    }

    /// Suspend the automatic sequence with all outputs off.
    pub fn enable_manual_mode(&mut self) {
        if !self.manual_mode {
            self.manual_mode = true;
            self.state = SystemState::Idle;
            self.reset_to_idle();
            info!("manual mode enabled");
        }
    }

    /// Return to automatic mode, unconditionally back at idle.
    pub fn disable_manual_mode(&mut self) {
        if self.manual_mode {
            self.manual_mode = false;
            self.state = SystemState::Idle;
            self.reset_to_idle();
            info!("manual mode disabled");
        }
    }

    pub fn enable_hold_after_fire(&mut self) {
        self.hold_after_fire = true;
        info!("hold-after-fire enabled");
    }

    pub fn disable_hold_after_fire(&mut self) {
        self.hold_after_fire = false;
        info!("hold-after-fire disabled");
    }

    /// Drive the actuator directly in manual mode. Motion toward an already
    /// engaged end stop is rejected. Returns whether the command was applied.
    pub fn manual_actuator(&mut self, mv: ActuatorMove) -> bool {
        if !self.manual_mode {
            warn!("manual actuator command ignored outside manual mode");
            return false;
        }
        match mv {
            ActuatorMove::Fwd if self.snapshot.a_engaged => {
                warn!("manual forward blocked: already at A end stop");
                return false;
            }
            ActuatorMove::Bwd if self.snapshot.b_engaged => {
                warn!("manual backward blocked: already at B end stop");
                return false;
            }
            _ => {}
        }
        info!(command = ?mv, "manual actuator");
        self.outputs.set_actuator(mv);
        true
    }

    /// Switch the electromagnet directly in manual mode. Returns whether the
    /// command was applied.
    pub fn manual_em(&mut self, on: bool) -> bool {
        if !self.manual_mode {
            warn!("manual EM command ignored outside manual mode");
            return false;
        }
        self.set_em(on);
        info!(on, "manual EM");
        true
    }

    /// One control cycle: latch the end stops, refresh the mirrors, then run
    /// either the manual hold or the automatic sequence.
    pub fn update(&mut self) {
        let (a_engaged, b_engaged) = self.end_stops.read_both();
        self.snapshot = EndStopSnapshot {
            a_engaged,
            b_engaged,
            read_us: self.clock.now_us(),
        };
        self.outputs.set_msw_mirror_a(a_engaged);
        self.outputs.set_msw_mirror_b(b_engaged);

        if self.manual_mode {
            // The sequence is suspended; only refresh the manually managed
            // EM level and keep READY off.
            self.outputs.set_em(self.em_output);
            if self.ready_output {
                self.outputs.set_ready(false);
                self.ready_output = false;
            }
            return;
        }

        let now_ms = self.clock.now_ms();
        match self.state {
            SystemState::Idle => {
                if self.arm_pending {
                    self.arm_pending = false;
                    info!("idle -> arm engage");
                    self.state = SystemState::ArmEngage;
                    self.state_entered_ms = now_ms;
                    self.set_em(true);
                    self.outputs.set_actuator(ActuatorMove::Fwd);
                } else {
                    self.reset_to_idle();
                }
            }

            SystemState::ArmEngage => {
                if a_engaged {
                    self.outputs.set_actuator(ActuatorMove::Stop);
                    info!("A end stop tripped -> pause before pull-back");
                    self.state = SystemState::ArmPause;
                    self.pause_started_ms = now_ms;
                } else if now_ms - self.state_entered_ms > ARM_TIMEOUT_MS {
                    if !self.err_arm_timeout {
                        warn!("arm timeout: A end stop never tripped");
                    }
                    // Sticky flag only; keep driving so a late trip recovers.
                    self.err_arm_timeout = true;
                }
            }

            SystemState::ArmPause => {
                if now_ms - self.pause_started_ms > PAUSE_BEFORE_PULLBACK_MS {
                    info!("pause elapsed -> pull-back");
                    self.state = SystemState::ArmPullback;
                    self.state_entered_ms = now_ms;
                    self.outputs.set_actuator(ActuatorMove::Bwd);
                }
            }

            SystemState::ArmPullback => {
                if b_engaged {
                    self.outputs.set_actuator(ActuatorMove::Stop);
                    info!("B end stop tripped -> armed ready");
                    self.state = SystemState::ArmedReady;
                    self.state_entered_ms = now_ms;
                    self.ready_output = true;
                    self.outputs.set_ready(true);
                } else if now_ms - self.state_entered_ms > PULLBACK_TIMEOUT_MS {
                    if !self.err_pullback_timeout {
                        warn!("pull-back timeout: B end stop never tripped");
                    }
                    self.err_pullback_timeout = true;
                }
            }

            SystemState::ArmedReady => {
                // The EM should be holding the switch against the A stop.
                if !a_engaged && !self.err_retain_fail {
                    warn!("retention lost while armed");
                    self.err_retain_fail = true;
                }

                if self.fire_pending {
                    self.fire_pending = false;
                    self.set_em(false);
                    self.outputs.set_ready(false);
                    self.ready_output = false;
                    self.state_entered_ms = now_ms;
                    if self.hold_after_fire {
                        info!("fire -> hold after fire");
                        self.state = SystemState::HoldAfterFire;
                        self.hold_drive_started = false;
                    } else {
                        info!("fire");
                        self.state = SystemState::Firing;
                    }
                }
            }

            SystemState::Firing => {
                // EM already dropped on the way in; one cycle, then idle.
                info!("firing complete -> idle");
                self.state = SystemState::Idle;
                self.reset_to_idle();
            }

            SystemState::HoldAfterFire => {
                if !a_engaged {
                    self.hold_drive_started = true;
                    self.outputs.set_actuator(ActuatorMove::Fwd);
                }
                if a_engaged && self.hold_drive_started {
                    self.outputs.set_actuator(ActuatorMove::Stop);
                    info!("hold complete at A end stop -> idle");
                    self.state = SystemState::Idle;
                    self.hold_drive_started = false;
                    self.reset_to_idle();
                }
            }
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    /// True only while armed and in automatic mode.
    pub fn is_ready(&self) -> bool {
        !self.manual_mode && self.state == SystemState::ArmedReady
    }

    pub fn is_em_active(&self) -> bool {
        self.em_output
    }

    pub fn is_manual_mode(&self) -> bool {
        self.manual_mode
    }

    pub fn is_hold_after_fire(&self) -> bool {
        self.hold_after_fire
    }

    /// The end-stop snapshot latched by the last `update()`.
    pub fn end_stop_snapshot(&self) -> EndStopSnapshot {
        self.snapshot
    }

    /// Sticky error bits: arm timeout, pull-back timeout, retention fail.
    pub fn error_flags(&self) -> u8 {
        let mut bits = 0;
        if self.err_arm_timeout {
            bits |= ERR_BIT_ARM_TIMEOUT;
        }
        if self.err_pullback_timeout {
            bits |= ERR_BIT_PULLBACK_TIMEOUT;
        }
        if self.err_retain_fail {
            bits |= ERR_BIT_RETAIN_FAIL;
        }
        bits
    }

    pub fn operational_status(&self) -> OperationalStatus {
        if self.manual_mode {
            return OperationalStatus::ManualMode;
        }
        match self.state {
            SystemState::Idle => OperationalStatus::Idle,
            SystemState::ArmEngage => OperationalStatus::Engaging,
            SystemState::ArmPause => OperationalStatus::PauseBeforePullback,
            SystemState::ArmPullback => OperationalStatus::PullingBack,
            SystemState::ArmedReady => OperationalStatus::Armed,
            SystemState::Firing => OperationalStatus::Firing,
            SystemState::HoldAfterFire => OperationalStatus::Holding,
        }
    }

    pub fn state_name(&self) -> &'static str {
        if self.manual_mode {
            return "MANUAL_MODE";
        }
        match self.state {
            SystemState::Idle => "IDLE",
            SystemState::ArmEngage => "ARM_ENGAGE",
            SystemState::ArmPause => "ARM_PAUSE",
            SystemState::ArmPullback => "ARM_PULLBACK",
            SystemState::ArmedReady => "ARMED_READY",
            SystemState::Firing => "FIRING",
            SystemState::HoldAfterFire => "HOLD_AFTER_FIRE",
        }
    }

    fn set_em(&mut self, on: bool) {
        self.em_output = on;
        self.outputs.set_em(on);
    }

    /// Stop the actuator, drop EM and READY, clear pending triggers and all
    /// sticky errors.
    fn reset_to_idle(&mut self) {
        self.outputs.set_actuator(ActuatorMove::Stop);
        self.set_em(false);
        if self.ready_output {
            self.outputs.set_ready(false);
            self.ready_output = false;
        }
        self.arm_pending = false;
        self.fire_pending = false;
        self.err_arm_timeout = false;
        self.err_pullback_timeout = false;
        self.err_retain_fail = false;
    }
}
