//! Telemetry schema text, digest, and fragment access.
//!
//! Every datagram is self-describing: the header carries the MD5 digest of
//! the full schema text plus one 16-byte fragment of it, cycled round-robin
//! one fragment per datagram. A receiver reconstructs the schema from any
//! window of `num_fragments` consecutive datagrams and keys it by digest.

use once_cell::sync::Lazy;

/// Schema fragment width carried per datagram.
pub const FRAGMENT_LEN: usize = 16;

/// Field list matching the payload record, in payload order.
const SCHEMA_BODY: &str = "node_name REMC\n\
c telem_period 100000\n\
v switch_voltage f32 u:kV\n\
v switch_current f32 u:kA\n\
v output_voltage_a f32 u:kV\n\
v output_voltage_b f32 u:kV\n\
v temperature_1 f32 u:degC\n\
v armed_status u8\n\
v em_status u8\n\
v msw_a_status u8\n\
v msw_b_status u8\n\
v manual_mode_status u8\n\
v hold_mode_status u8\n";

/// The schema with its precomputed digest and fragment count.
pub struct Schema {
    text: String,
    digest: [u8; 16],
    num_fragments: u32,
}

impl Schema {
    fn build() -> Self {
        // Newline-pad to a whole number of fragments.
        let mut text = String::from(SCHEMA_BODY);
        while text.len() % FRAGMENT_LEN != 0 {
            text.push('\n');
        }
        let digest = md5::compute(text.as_bytes()).0;
        let num_fragments = (text.len() / FRAGMENT_LEN) as u32;
        Self {
            text,
            digest,
            num_fragments,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn digest(&self) -> &[u8; 16] {
        &self.digest
    }

    pub fn num_fragments(&self) -> u32 {
        self.num_fragments
    }

    /// The `index`-th 16-byte slice of the schema text, zero-padded past the
    /// end (indices are taken modulo the fragment count by the caller).
    pub fn fragment(&self, index: u32) -> [u8; FRAGMENT_LEN] {
        let mut out = [0u8; FRAGMENT_LEN];
        let start = index as usize * FRAGMENT_LEN;
        let bytes = self.text.as_bytes();
        if start < bytes.len() {
            let end = (start + FRAGMENT_LEN).min(bytes.len());
            out[..end - start].copy_from_slice(&bytes[start..end]);
        }
        out
    }
}

/// Process-wide schema constants, computed once.
pub static SCHEMA: Lazy<Schema> = Lazy::new(Schema::build);
