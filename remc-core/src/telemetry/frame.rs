//! Datagram framing: the 64-byte header and the 34-byte payload record.
//!
//! Header words are big-endian; payload records are written in host order
//! (little-endian on every deployment target). A full bundle of 41 records
//! gives a 1458-byte datagram, inside the 1472-byte UDP payload limit of a
//! standard Ethernet MTU.

use bytemuck::{Pod, Zeroable};

use super::schema::SCHEMA;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 64;
/// Payload record length in bytes.
pub const RECORD_SIZE: usize = 34;
/// Records per datagram before a flush is forced.
pub const MAX_RECORDS_PER_DATAGRAM: usize = 41;

/// Message id of the telemetry stream.
pub const MSG_ID: u32 = 1;

/// Values of the header FLAGS word.
pub mod flags {
    /// Live streaming telemetry.
    pub const LIVE: u32 = 0;
    /// Records replayed from a capture window.
    pub const COLLECTED: u32 = 1;
    /// End-of-window marker (carries one zeroed record).
    pub const BATCH_END: u32 = 2;
}

/// One converted telemetry record as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, packed)]
pub struct TelemetryRecord {
    pub switch_voltage_kv: f32,
    pub switch_current_a: f32,
    pub output_a_kv: f32,
    pub output_b_kv: f32,
    pub temperature_1_degc: f32,
    /// Wall-clock sample time in Unix microseconds (0 before first sync).
    pub unix_us: u64,
    pub ready: u8,
    pub em: u8,
    /// Raw A end-stop line level: 1 released, 0 engaged.
    pub msw_a: u8,
    /// Raw B end-stop line level: 1 released, 0 engaged.
    pub msw_b: u8,
    pub manual: u8,
    pub hold: u8,
}

// SAFETY: repr(C, packed) with Pod fields and no padding (20 + 8 + 6 bytes).
unsafe impl Pod for TelemetryRecord {}
// SAFETY: all-zero bytes are a valid TelemetryRecord.
unsafe impl Zeroable for TelemetryRecord {}

/// Build one datagram: header plus `records` back to back.
///
/// `frag_index` selects the schema fragment carried by this datagram;
/// `unix_ns` is the emission wall-clock time in nanoseconds.
pub fn build_datagram(records: &[TelemetryRecord], flag_word: u32, frag_index: u32, unix_ns: u64) -> Vec<u8> {
    debug_assert!(!records.is_empty() && records.len() <= MAX_RECORDS_PER_DATAGRAM);

    let mut buf = Vec::with_capacity(HEADER_SIZE + RECORD_SIZE * records.len());
    buf.extend_from_slice(&MSG_ID.to_be_bytes());
    buf.extend_from_slice(&flag_word.to_be_bytes());
    buf.extend_from_slice(&SCHEMA.num_fragments().to_be_bytes());
    buf.extend_from_slice(&1u32.to_be_bytes()); // one atomic fragment
    buf.extend_from_slice(SCHEMA.digest());
    buf.extend_from_slice(&SCHEMA.fragment(frag_index));
    buf.extend_from_slice(&frag_index.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // atomic index
    buf.extend_from_slice(&unix_ns.to_be_bytes());
    debug_assert_eq!(buf.len(), HEADER_SIZE);

    for record in records {
        buf.extend_from_slice(bytemuck::bytes_of(record));
    }
    buf
}
