//! Rolling capture buffer with windowed pre/post-trigger extraction.
//!
//! Every sample drained from the shared ring lands here, so the buffer
//! continuously retains the most recent `capacity` samples (25 s at the
//! default 250 000 slots and 10 kHz). A collect request opens a job anchored
//! at the sample count of the moment it arrived; once the post-trigger half
//! of the window has been captured, the whole window is replayed through the
//! telemetry emitter in collected mode and closed with a batch-end marker.

use thiserror::Error;
use tracing::{info, warn};

use crate::sample::Sample;
use crate::telemetry::emitter::{StatusFlags, TelemetryEmitter};
use crate::timebase::clock::MicrosClock;
use crate::timebase::mapper::TimeMapper;

/// Default capture depth in samples.
pub const DEFAULT_CAPTURE_CAPACITY: usize = 250_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("window stop ({stop}) must be greater than start ({start})")]
    InvalidWindow { start: i64, stop: i64 },
    #[error("an extraction job is already active")]
    JobActive,
}

/// An open extraction request, anchored at the head count of its arrival.
#[derive(Debug, Clone, Copy)]
struct CaptureJob {
    start_rel: i64,
    stop_rel: i64,
    reference_count: u64,
}

pub struct CaptureBuffer {
    storage: Vec<Sample>,
    capacity: u64,
    /// Absolute count of samples ever ingested; never masked.
    head: u64,
    window_start: i64,
    window_stop: i64,
    job: Option<CaptureJob>,
    /// Samples emitted by the most recently completed job.
    last_collected: u64,
}

impl CaptureBuffer {
    /// Allocate a buffer of `capacity` slots with a default extraction
    /// window.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, window_start: i64, window_stop: i64) -> Self {
        assert!(capacity > 0, "capture capacity must be nonzero");
        Self {
            storage: vec![Sample::new(0, 0, 0, 0, 0, 0, 0); capacity],
            capacity: capacity as u64,
            head: 0,
            window_start,
            window_stop,
            job: None,
            last_collected: 0,
        }
    }

    /// Append a drained batch, overwriting the oldest samples when full.
    pub fn ingest_bulk(&mut self, samples: &[Sample]) {
        for sample in samples {
            let slot = (self.head % self.capacity) as usize;
            self.storage[slot] = *sample;
            self.head += 1;
        }
    }

    /// Store new default window bounds for parameterless collect requests.
    pub fn set_window(&mut self, start_rel: i64, stop_rel: i64) -> Result<(), CaptureError> {
        if stop_rel <= start_rel {
            return Err(CaptureError::InvalidWindow {
                start: start_rel,
                stop: stop_rel,
            });
        }
        self.window_start = start_rel;
        self.window_stop = stop_rel;
        Ok(())
    }

    /// Open an extraction job for `[start_rel, stop_rel)` around the current
    /// sample count. At most one job may be active.
    pub fn open_job(&mut self, start_rel: i64, stop_rel: i64) -> Result<(), CaptureError> {
        if stop_rel <= start_rel {
            return Err(CaptureError::InvalidWindow {
                start: start_rel,
                stop: stop_rel,
            });
        }
        if self.job.is_some() {
            return Err(CaptureError::JobActive);
        }
        info!(
            start_rel,
            stop_rel,
            reference = self.head,
            "capture job opened"
        );
        self.job = Some(CaptureJob {
            start_rel,
            stop_rel,
            reference_count: self.head,
        });
        Ok(())
    }

    /// Open a job using the stored default window.
    pub fn open_default_job(&mut self) -> Result<(), CaptureError> {
        self.open_job(self.window_start, self.window_stop)
    }

    /// True when the active job's entire window has been captured.
    pub fn can_extract(&self) -> bool {
        match self.job {
            Some(job) => self.head as i64 >= job.reference_count as i64 + job.stop_rel,
            None => false,
        }
    }

    /// Run one poll: if the active job is complete, replay its window through
    /// the emitter and close it.
    pub fn poll(
        &mut self,
        emitter: &mut TelemetryEmitter,
        status: StatusFlags,
        mapper: &TimeMapper,
        clock: &dyn MicrosClock,
    ) {
        if !self.can_extract() {
            return;
        }
        let job = self.job.take().expect("can_extract checked the job");

        let oldest = self.oldest_retained();
        let mut collected: u64 = 0;
        let mut too_old: u64 = 0;

        emitter.begin_collected(mapper, clock);
        for rel in job.start_rel..job.stop_rel {
            let abs = job.reference_count as i64 + rel;
            if abs < 0 || (abs as u64) < oldest {
                // History already overwritten (or before the stream began).
                too_old += 1;
                continue;
            }
            let abs = abs as u64;
            if abs >= self.head {
                // Requested data that was never captured; close out early.
                warn!(abs, head = self.head, "capture window ran past head");
                break;
            }
            let slot = (abs % self.capacity) as usize;
            emitter.add_sample(&self.storage[slot], status, mapper, clock);
            collected += 1;
        }
        emitter.finish_collected(mapper, clock);

        if too_old > 0 {
            warn!(too_old, "capture window entries lost to overwrite");
        }
        info!(collected, reference = job.reference_count, "capture window sent");
        self.last_collected = collected;
    }

    /// Absolute index of the oldest sample still retained.
    pub fn oldest_retained(&self) -> u64 {
        self.head.saturating_sub(self.capacity)
    }

    /// Absolute count of samples ever ingested.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Samples currently held.
    pub fn stored(&self) -> u64 {
        self.head.min(self.capacity)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn job_active(&self) -> bool {
        self.job.is_some()
    }

    /// Samples emitted by the most recently completed job.
    pub fn last_collected(&self) -> u64 {
        self.last_collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::RecordingSink;
    use crate::telemetry::frame::{flags, HEADER_SIZE, RECORD_SIZE};
    use crate::telemetry::TelemetryRecord;
    use crate::timebase::clock::ChainedMicros;

    fn stamped(seq: u64) -> Sample {
        Sample::new(seq, seq as u16, 0, 0, 0, 0, seq + 1)
    }

    fn rig() -> (
        TelemetryEmitter,
        std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
        TimeMapper,
        ChainedMicros,
    ) {
        let (sink, sent) = RecordingSink::new();
        let emitter = TelemetryEmitter::new(Box::new(sink));
        let mapper = TimeMapper::new(10_000);
        let clock = ChainedMicros::new();
        (emitter, sent, mapper, clock)
    }

    fn ingest_n(buffer: &mut CaptureBuffer, from: u64, count: u64) {
        let batch: Vec<Sample> = (from..from + count).map(stamped).collect();
        buffer.ingest_bulk(&batch);
    }

    fn record_at(dgram: &[u8], i: usize) -> TelemetryRecord {
        let start = HEADER_SIZE + i * RECORD_SIZE;
        *bytemuck::from_bytes(&dgram[start..start + RECORD_SIZE])
    }

    #[test]
    fn test_rolling_overwrite() {
        let mut buffer = CaptureBuffer::new(10, -2, 2);
        ingest_n(&mut buffer, 0, 25);
        assert_eq!(buffer.head(), 25);
        assert_eq!(buffer.stored(), 10);
        assert_eq!(buffer.oldest_retained(), 15);
    }

    #[test]
    fn test_window_extraction_pre_and_post_trigger() {
        let mut buffer = CaptureBuffer::new(50, -10, 10);
        let (mut emitter, sent, mapper, clock) = rig();

        ingest_n(&mut buffer, 0, 100);
        assert_eq!(buffer.head(), 100);
        buffer.open_default_job().unwrap();

        // Post-trigger half not yet captured.
        assert!(!buffer.can_extract());
        buffer.poll(&mut emitter, StatusFlags::default(), &mapper, &clock);
        assert!(buffer.job_active());

        ingest_n(&mut buffer, 100, 20);
        assert!(buffer.can_extract());
        buffer.poll(&mut emitter, StatusFlags::default(), &mapper, &clock);
        assert!(!buffer.job_active());
        assert_eq!(buffer.last_collected(), 20);

        let sent = sent.lock().unwrap();
        // One collected datagram of 20 records plus the marker.
        assert_eq!(sent.len(), 2);
        let first = &sent[0];
        assert_eq!(
            u32::from_be_bytes([first[4], first[5], first[6], first[7]]),
            flags::COLLECTED
        );
        assert_eq!(first.len(), HEADER_SIZE + 20 * RECORD_SIZE);
        // Absolute indices 90..=109: the raw sequence rides in sw_i, which
        // the switch-voltage channel does not touch; check the timestamp
        // words instead (unmapped, so unix_us is 0; check current channel).
        let r0 = record_at(first, 0);
        let r19 = record_at(first, 19);
        // sw_i carried the sequence; current = seq * scale + offset.
        let expected0 = crate::telemetry::calib::SWITCH_CURRENT_A.to_physical(90);
        let expected19 = crate::telemetry::calib::SWITCH_CURRENT_A.to_physical(109);
        assert_eq!({ r0.switch_current_a }, expected0);
        assert_eq!({ r19.switch_current_a }, expected19);

        let marker = &sent[1];
        assert_eq!(
            u32::from_be_bytes([marker[4], marker[5], marker[6], marker[7]]),
            flags::BATCH_END
        );
        assert_eq!(marker.len(), HEADER_SIZE + RECORD_SIZE);
    }

    #[test]
    fn test_overwritten_history_is_skipped() {
        let mut buffer = CaptureBuffer::new(50, 0, 1);
        let (mut emitter, sent, mapper, clock) = rig();

        // Ask for 40 samples of history when only 30 exist.
        ingest_n(&mut buffer, 0, 30);
        buffer.open_job(-40, 0).unwrap();
        assert!(buffer.can_extract());
        buffer.poll(&mut emitter, StatusFlags::default(), &mapper, &clock);

        // 30 available, 10 reported too old.
        assert_eq!(buffer.last_collected(), 30);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2); // one data datagram + marker
        assert_eq!(sent[0].len(), HEADER_SIZE + 30 * RECORD_SIZE);
    }

    #[test]
    fn test_deep_history_beyond_capacity() {
        let mut buffer = CaptureBuffer::new(20, 0, 1);
        let (mut emitter, sent, mapper, clock) = rig();

        ingest_n(&mut buffer, 0, 100);
        // Request reaches 30 back, but only 20 are retained.
        buffer.open_job(-30, 0).unwrap();
        buffer.poll(&mut emitter, StatusFlags::default(), &mapper, &clock);

        assert_eq!(buffer.last_collected(), 20);
        let sent = sent.lock().unwrap();
        let first = record_at(&sent[0], 0);
        let expected = crate::telemetry::calib::SWITCH_CURRENT_A.to_physical(80);
        assert_eq!({ first.switch_current_a }, expected);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut buffer = CaptureBuffer::new(10, -2, 2);
        assert_eq!(
            buffer.open_job(5, 5),
            Err(CaptureError::InvalidWindow { start: 5, stop: 5 })
        );
        assert_eq!(
            buffer.set_window(3, -3),
            Err(CaptureError::InvalidWindow { start: 3, stop: -3 })
        );
    }

    #[test]
    fn test_second_job_rejected_while_active() {
        let mut buffer = CaptureBuffer::new(10, -2, 2);
        buffer.open_job(-1, 5).unwrap();
        assert_eq!(buffer.open_job(-1, 5), Err(CaptureError::JobActive));
    }

    #[test]
    fn test_set_window_applies_to_default_job() {
        let mut buffer = CaptureBuffer::new(100, -2, 2);
        let (mut emitter, sent, mapper, clock) = rig();

        buffer.set_window(-5, 5).unwrap();
        ingest_n(&mut buffer, 0, 50);
        buffer.open_default_job().unwrap();
        ingest_n(&mut buffer, 50, 10);
        buffer.poll(&mut emitter, StatusFlags::default(), &mapper, &clock);

        assert_eq!(buffer.last_collected(), 10);
        assert_eq!(sent.lock().unwrap()[0].len(), HEADER_SIZE + 10 * RECORD_SIZE);
    }
}
