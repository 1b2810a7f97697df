//! Telemetry: calibration, datagram framing, schema publication, and the
//! bundling emitter.

pub mod calib;
pub mod emitter;
pub mod frame;
pub mod schema;

pub use emitter::{StatusFlags, TelemetryEmitter};
pub use frame::{TelemetryRecord, HEADER_SIZE, MAX_RECORDS_PER_DATAGRAM, RECORD_SIZE};
pub use schema::SCHEMA;
