//! Time base: the shared microsecond counter, the NTP client, and the
//! mapping between counter time and Unix wall-clock time.

pub mod clock;
pub mod mapper;
pub mod ntp;

pub use clock::{ChainedMicros, MicrosClock, SystemClock};
pub use mapper::TimeMapper;
pub use ntp::{AnchorSource, NtpAnchor, NtpClient, SyncError};
