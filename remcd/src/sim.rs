//! Simulated analog front end for running the daemon without hardware.

use remc_core::io::{AnalogFrame, AnalogInputs};

/// Synthetic waveforms centered mid-range, distinct per channel so the
/// ground-station display shows recognizable traces.
pub struct SimulatedAnalogInputs {
    phase: u32,
}

impl SimulatedAnalogInputs {
    pub fn new() -> Self {
        Self { phase: 0 }
    }
}

impl AnalogInputs for SimulatedAnalogInputs {
    fn read_all(&mut self) -> AnalogFrame {
        self.phase = self.phase.wrapping_add(1);
        let t = self.phase as f32 * 0.001;
        let mid = 2048.0;
        let wave = |amp: f32, freq: f32, offset: f32| -> u16 {
            ((mid + amp * (freq * t + offset).sin()).clamp(0.0, 4095.0)) as u16
        };
        AnalogFrame {
            switch_current: wave(500.0, 1.0, 0.0),
            switch_voltage: wave(800.0, 0.5, 1.0),
            output_a: wave(600.0, 0.3, 2.0),
            output_b: wave(600.0, 0.3, 4.0),
            temperature_1: 2200 + (self.phase % 16) as u16,
        }
    }
}
