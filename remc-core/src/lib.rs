//! Core components of the rapid electromechanical switch controller.
//!
//! The controller splits across two threads mirroring the two cores of the
//! target hardware: a fixed-cadence [`sampler::Sampler`] produces timestamped
//! analog records into the lock-free [`ring`], and the [`supervisor`] drains
//! them into the rolling [`capture`] buffer and the multicast [`telemetry`]
//! stream while ticking the arm/fire [`fsm`] and serving ground-station
//! commands. All hardware access goes through the capability traits in
//! [`io`], so the full pipeline runs against mocks on any host.

pub mod capture;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod fsm;
pub mod io;
pub mod ring;
pub mod sample;
pub mod sampler;
pub mod supervisor;
pub mod telemetry;
pub mod timebase;

pub use capture::CaptureBuffer;
pub use command::{Command, CommandSource};
pub use config::ControllerConfig;
pub use fsm::{StateMachine, SystemState};
pub use ring::{RingConsumer, RingProducer, SharedRing};
pub use sample::Sample;
pub use sampler::Sampler;
pub use supervisor::Supervisor;
pub use telemetry::{StatusFlags, TelemetryEmitter};
pub use timebase::{ChainedMicros, MicrosClock, NtpClient, SystemClock, TimeMapper};
