//! Bundling telemetry emitter.
//!
//! Converted records accumulate in a bundle of at most 41; a full bundle
//! flushes immediately and the supervisor flushes any remainder once per
//! loop iteration. Each flushed datagram carries the next schema fragment in
//! round-robin order. During a capture-window replay the emitter is switched
//! into collected mode, which tags the datagrams and terminates the replay
//! with a batch-end marker.

use tracing::warn;

use super::frame::{self, flags, TelemetryRecord, MAX_RECORDS_PER_DATAGRAM};
use super::calib;
use super::schema::SCHEMA;
use crate::io::DatagramSink;
use crate::sample::Sample;
use crate::timebase::clock::MicrosClock;
use crate::timebase::mapper::TimeMapper;
use bytemuck::Zeroable;

/// Controller status bits attached to every record, at wire polarity
/// (`msw_*` carry the raw line level: 1 = released).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusFlags {
    pub ready: bool,
    pub em: bool,
    pub msw_a: bool,
    pub msw_b: bool,
    pub manual: bool,
    pub hold: bool,
}

pub struct TelemetryEmitter {
    sink: Box<dyn DatagramSink>,
    bundle: Vec<TelemetryRecord>,
    frag_index: u32,
    collected_mode: bool,
    datagrams_sent: u64,
    send_failures: u64,
}

impl TelemetryEmitter {
    pub fn new(sink: Box<dyn DatagramSink>) -> Self {
        Self {
            sink,
            bundle: Vec::with_capacity(MAX_RECORDS_PER_DATAGRAM),
            frag_index: 0,
            collected_mode: false,
            datagrams_sent: 0,
            send_failures: 0,
        }
    }

    /// Convert one raw sample and append it to the current bundle, flushing
    /// if the bundle is full.
    pub fn add_sample(
        &mut self,
        raw: &Sample,
        status: StatusFlags,
        mapper: &TimeMapper,
        clock: &dyn MicrosClock,
    ) {
        let record = convert(raw, status, mapper);
        self.bundle.push(record);
        if self.bundle.len() >= MAX_RECORDS_PER_DATAGRAM {
            self.flush(mapper, clock);
        }
    }

    /// Append a batch of raw samples, flushing whenever a bundle fills.
    pub fn add_samples_bulk(
        &mut self,
        raws: &[Sample],
        status: StatusFlags,
        mapper: &TimeMapper,
        clock: &dyn MicrosClock,
    ) {
        for raw in raws {
            self.add_sample(raw, status, mapper, clock);
        }
    }

    /// Emit the current bundle, if any, and cycle the schema fragment.
    pub fn flush(&mut self, mapper: &TimeMapper, clock: &dyn MicrosClock) {
        if self.bundle.is_empty() {
            return;
        }
        let flag_word = if self.collected_mode {
            flags::COLLECTED
        } else {
            flags::LIVE
        };
        self.emit(flag_word, mapper, clock);
    }

    /// Enter capture-replay mode. Any live remainder is flushed first so the
    /// tag applies only to replayed records.
    pub fn begin_collected(&mut self, mapper: &TimeMapper, clock: &dyn MicrosClock) {
        self.flush(mapper, clock);
        self.collected_mode = true;
    }

    /// Flush the replay remainder, emit the batch-end marker, and return to
    /// live mode.
    pub fn finish_collected(&mut self, mapper: &TimeMapper, clock: &dyn MicrosClock) {
        self.flush(mapper, clock);
        self.bundle.push(TelemetryRecord::zeroed());
        self.emit(flags::BATCH_END, mapper, clock);
        self.collected_mode = false;
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    pub fn pending(&self) -> usize {
        self.bundle.len()
    }

    fn emit(&mut self, flag_word: u32, mapper: &TimeMapper, clock: &dyn MicrosClock) {
        let unix_ns = mapper.hw_to_unix(clock.now_us()).wrapping_mul(1000);
        let datagram = frame::build_datagram(&self.bundle, flag_word, self.frag_index, unix_ns);
        match self.sink.send(&datagram) {
            Ok(()) => self.datagrams_sent += 1,
            Err(e) => {
                // Drop the datagram and keep streaming.
                self.send_failures += 1;
                warn!(error = %e, "telemetry send failed");
            }
        }
        self.bundle.clear();
        self.frag_index = (self.frag_index + 1) % SCHEMA.num_fragments();
    }
}

fn convert(raw: &Sample, status: StatusFlags, mapper: &TimeMapper) -> TelemetryRecord {
    TelemetryRecord {
        switch_voltage_kv: calib::SWITCH_VOLTAGE_KV.to_physical(raw.sw_v),
        switch_current_a: calib::SWITCH_CURRENT_A.to_physical(raw.sw_i),
        output_a_kv: calib::OUTPUT_A_KV.to_physical(raw.out_a),
        output_b_kv: calib::OUTPUT_B_KV.to_physical(raw.out_b),
        temperature_1_degc: calib::TEMP_1_DEGC.to_physical(raw.t1),
        unix_us: mapper.sample_to_unix(raw.t_us, raw.rollover_count),
        ready: status.ready as u8,
        em: status.em as u8,
        msw_a: status.msw_a as u8,
        msw_b: status.msw_b as u8,
        manual: status.manual as u8,
        hold: status.hold as u8,
    }
}
