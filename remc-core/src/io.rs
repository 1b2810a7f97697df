//! Hardware capability traits and their mock implementations.
//!
//! The state machine, sampler, and telemetry emitter talk to pins, ADCs, and
//! the network through these seams so every component runs unmodified against
//! the mocks in tests and in the daemon's simulation mode.

/// Actuator drive command for the linear actuator H-bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorMove {
    Stop,
    /// Drive toward the A end stop (engage).
    Fwd,
    /// Drive toward the B end stop (disengage).
    Bwd,
}

/// One burst of raw 12-bit readings from the five analog channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalogFrame {
    pub switch_current: u16,
    pub switch_voltage: u16,
    pub output_a: u16,
    pub output_b: u16,
    pub temperature_1: u16,
}

/// The five analog inputs, read as one burst.
pub trait AnalogInputs: Send {
    fn read_all(&mut self) -> AnalogFrame;
}

/// The two end-stop microswitches. `true` means the switch is engaged
/// (the line is low; the inputs are active-low).
pub trait EndStops: Send + Sync {
    /// Read both switches from one snapshot: `(a_engaged, b_engaged)`.
    fn read_both(&self) -> (bool, bool);
}

/// Every output line the state machine drives. Written only by the state
/// machine, at most once per update.
pub trait SwitchOutputs: Send {
    fn set_actuator(&mut self, mv: ActuatorMove);
    fn set_em(&mut self, on: bool);
    fn set_ready(&mut self, on: bool);
    /// Mirror of the A end-stop input, for external status indication.
    fn set_msw_mirror_a(&mut self, engaged: bool);
    /// Mirror of the B end-stop input.
    fn set_msw_mirror_b(&mut self, engaged: bool);
}

/// Outbound datagram transport for telemetry.
pub trait DatagramSink: Send {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()>;
}

pub mod mock {
    //! Shared mock hardware used by the tests and by the daemon's
    //! simulation mode.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::command::{Command, CommandSource};
    use crate::timebase::clock::MicrosClock;
    use crate::timebase::ntp::{AnchorSource, NtpAnchor, SyncError};

    /// Analog inputs returning a fixed frame, optionally ramping the switch
    /// current channel each read so consecutive samples are distinguishable.
    pub struct MockAnalogInputs {
        frame: AnalogFrame,
        ramp: bool,
    }

    impl MockAnalogInputs {
        pub fn fixed(frame: AnalogFrame) -> Self {
            Self { frame, ramp: false }
        }

        pub fn ramping() -> Self {
            Self {
                frame: AnalogFrame::default(),
                ramp: true,
            }
        }
    }

    impl AnalogInputs for MockAnalogInputs {
        fn read_all(&mut self) -> AnalogFrame {
            let frame = self.frame;
            if self.ramp {
                self.frame.switch_current = self.frame.switch_current.wrapping_add(1) & 0x0FFF;
            }
            frame
        }
    }

    /// End stops controllable from the test body while the machine under
    /// test holds a reading handle.
    #[derive(Default)]
    pub struct EndStopCell {
        a_engaged: AtomicBool,
        b_engaged: AtomicBool,
    }

    impl EndStopCell {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_a_engaged(&self, engaged: bool) {
            self.a_engaged.store(engaged, Ordering::Release);
        }

        pub fn set_b_engaged(&self, engaged: bool) {
            self.b_engaged.store(engaged, Ordering::Release);
        }
    }

    impl EndStops for EndStopCell {
        fn read_both(&self) -> (bool, bool) {
            (
                self.a_engaged.load(Ordering::Acquire),
                self.b_engaged.load(Ordering::Acquire),
            )
        }
    }

    /// Output recorder exposing the current level of every line through a
    /// shared probe handle.
    #[derive(Debug, Default)]
    pub struct OutputProbe {
        inner: Mutex<OutputLevels>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct OutputLevels {
        pub actuator: ActuatorMove,
        pub em: bool,
        pub ready: bool,
        pub mirror_a: bool,
        pub mirror_b: bool,
    }

    impl Default for OutputLevels {
        fn default() -> Self {
            Self {
                actuator: ActuatorMove::Stop,
                em: false,
                ready: false,
                mirror_a: false,
                mirror_b: false,
            }
        }
    }

    impl OutputProbe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn levels(&self) -> OutputLevels {
            *self.inner.lock().unwrap()
        }
    }

    /// `SwitchOutputs` writer half of an [`OutputProbe`].
    pub struct MockOutputs {
        probe: Arc<OutputProbe>,
    }

    impl MockOutputs {
        pub fn new(probe: Arc<OutputProbe>) -> Self {
            Self { probe }
        }
    }

    impl SwitchOutputs for MockOutputs {
        fn set_actuator(&mut self, mv: ActuatorMove) {
            self.probe.inner.lock().unwrap().actuator = mv;
        }

        fn set_em(&mut self, on: bool) {
            self.probe.inner.lock().unwrap().em = on;
        }

        fn set_ready(&mut self, on: bool) {
            self.probe.inner.lock().unwrap().ready = on;
        }

        fn set_msw_mirror_a(&mut self, engaged: bool) {
            self.probe.inner.lock().unwrap().mirror_a = engaged;
        }

        fn set_msw_mirror_b(&mut self, engaged: bool) {
            self.probe.inner.lock().unwrap().mirror_b = engaged;
        }
    }

    /// Datagram sink capturing everything sent, inspectable through a
    /// shared handle.
    pub struct RecordingSink {
        datagrams: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingSink {
        pub fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let datagrams = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    datagrams: Arc::clone(&datagrams),
                },
                datagrams,
            )
        }
    }

    impl DatagramSink for RecordingSink {
        fn send(&mut self, datagram: &[u8]) -> std::io::Result<()> {
            self.datagrams.lock().unwrap().push(datagram.to_vec());
            Ok(())
        }
    }

    /// Command source fed from a shared queue instead of a socket. Clones
    /// share the queue, so a test can keep a handle and push while the
    /// supervisor polls.
    #[derive(Clone, Default)]
    pub struct CommandQueue {
        queue: Arc<Mutex<VecDeque<Command>>>,
    }

    impl CommandQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, command: Command) {
            self.queue.lock().unwrap().push_back(command);
        }
    }

    impl CommandSource for CommandQueue {
        fn poll_command(&mut self) -> Option<Command> {
            self.queue.lock().unwrap().pop_front()
        }
    }

    /// Anchor source returning a preconfigured result.
    pub struct MockAnchorSource {
        pub anchor: Option<NtpAnchor>,
        pub attempts: u32,
    }

    impl MockAnchorSource {
        pub fn with_anchor(anchor: NtpAnchor) -> Self {
            Self {
                anchor: Some(anchor),
                attempts: 0,
            }
        }

        pub fn failing() -> Self {
            Self {
                anchor: None,
                attempts: 0,
            }
        }
    }

    impl AnchorSource for MockAnchorSource {
        fn obtain_anchor(
            &mut self,
            _clock: &dyn MicrosClock,
            _timeout: Duration,
        ) -> Result<NtpAnchor, SyncError> {
            self.attempts += 1;
            self.anchor.ok_or(SyncError::Timeout)
        }
    }
}
