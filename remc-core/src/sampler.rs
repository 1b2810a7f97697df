//! Fixed-cadence sample producer.
//!
//! Runs alone on its own thread: each tick snapshots the counter, reads the
//! five analog channels, snapshots the counter again, and pushes the record.
//! The loop never calls into the consumer side and never touches the network,
//! so its cadence depends only on the ADC and the clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::io::AnalogInputs;
use crate::ring::RingProducer;
use crate::sample::Sample;
use crate::timebase::clock::MicrosClock;

/// Sleep down to this margin before the deadline, then spin.
const SLEEP_MARGIN_US: u64 = 150;

pub struct Sampler {
    producer: RingProducer,
    adc: Box<dyn AnalogInputs>,
    clock: Arc<dyn MicrosClock>,
    period_us: u64,
    ticks: u64,
}

impl Sampler {
    pub fn new(
        producer: RingProducer,
        adc: Box<dyn AnalogInputs>,
        clock: Arc<dyn MicrosClock>,
        sample_rate_hz: u32,
    ) -> Self {
        Self {
            producer,
            adc,
            clock,
            period_us: 1_000_000 / sample_rate_hz as u64,
            ticks: 0,
        }
    }

    /// Acquire and publish one record.
    pub fn tick(&mut self) {
        let start_us = self.clock.now_us();
        let frame = self.adc.read_all();
        let end_us = self.clock.now_us();
        self.producer.push(Sample::new(
            start_us,
            frame.switch_current,
            frame.switch_voltage,
            frame.output_a,
            frame.output_b,
            frame.temperature_1,
            end_us,
        ));
        self.ticks += 1;
    }

    /// Ticks produced so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Records dropped because the consumer fell behind.
    pub fn overruns(&self) -> u32 {
        self.producer.overruns()
    }

    /// Run on the acquisition grid until `shutdown` is set. Sleeps toward
    /// each deadline and spins the final stretch to keep jitter down; if the
    /// loop falls badly behind it re-anchors instead of bursting to catch up.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(period_us = self.period_us, "sampler running");
        let mut next = self.clock.now_us() + self.period_us;
        while !shutdown.load(Ordering::Relaxed) {
            self.tick();

            if self.clock.now_us() > next + 10 * self.period_us {
                next = self.clock.now_us() + self.period_us;
                continue;
            }
            loop {
                let now = self.clock.now_us();
                if now >= next {
                    break;
                }
                let remaining = next - now;
                if remaining > SLEEP_MARGIN_US {
                    std::thread::sleep(Duration::from_micros(remaining - SLEEP_MARGIN_US));
                } else {
                    std::hint::spin_loop();
                }
            }
            next += self.period_us;
        }
        info!(ticks = self.ticks, "sampler stopped");
    }
}
