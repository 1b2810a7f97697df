//! gpiod-backed output and end-stop implementations for real hardware.

use std::sync::Mutex;

use anyhow::{Context, Result};
use gpiod::{Chip, Input, Lines, Options, Output};

use remc_core::config::GpioConfig;
use remc_core::io::{ActuatorMove, EndStops, SwitchOutputs};

/// Output line order within the request: actuator A/B, EM, READY, mirrors.
const OUTPUT_LINES: usize = 6;

pub struct GpioSwitchOutputs {
    lines: Lines<Output>,
    levels: [bool; OUTPUT_LINES],
}

impl GpioSwitchOutputs {
    pub fn open(cfg: &GpioConfig) -> Result<Self> {
        let chip = Chip::new(&cfg.chip)
            .with_context(|| format!("failed to open GPIO chip '{}'", cfg.chip))?;
        let offsets = [
            cfg.actuator_fwd_line,
            cfg.actuator_bwd_line,
            cfg.em_line,
            cfg.ready_line,
            cfg.msw_mirror_a_line,
            cfg.msw_mirror_b_line,
        ];
        let options = Options::output(offsets)
            .values([false; OUTPUT_LINES])
            .consumer("remcd-outputs");
        let lines = chip
            .request_lines(options)
            .context("failed to request output lines")?;
        Ok(Self {
            lines,
            levels: [false; OUTPUT_LINES],
        })
    }

    fn apply(&mut self) {
        // A failed write leaves the cached levels for the next update.
        let _ = self.lines.set_values(self.levels);
    }
}

impl SwitchOutputs for GpioSwitchOutputs {
    fn set_actuator(&mut self, mv: ActuatorMove) {
        let (a, b) = match mv {
            ActuatorMove::Stop => (false, false),
            ActuatorMove::Fwd => (true, false),
            ActuatorMove::Bwd => (false, true),
        };
        self.levels[0] = a;
        self.levels[1] = b;
        self.apply();
    }

    fn set_em(&mut self, on: bool) {
        self.levels[2] = on;
        self.apply();
    }

    fn set_ready(&mut self, on: bool) {
        self.levels[3] = on;
        self.apply();
    }

    fn set_msw_mirror_a(&mut self, engaged: bool) {
        self.levels[4] = engaged;
        self.apply();
    }

    fn set_msw_mirror_b(&mut self, engaged: bool) {
        self.levels[5] = engaged;
        self.apply();
    }
}

/// Active-low end-stop inputs with pull-ups: a low line means engaged.
pub struct GpioEndStops {
    lines: Mutex<Lines<Input>>,
}

impl GpioEndStops {
    pub fn open(cfg: &GpioConfig) -> Result<Self> {
        let chip = Chip::new(&cfg.chip)
            .with_context(|| format!("failed to open GPIO chip '{}'", cfg.chip))?;
        let options = Options::input([cfg.msw_a_line, cfg.msw_b_line]).consumer("remcd-endstops");
        let lines = chip
            .request_lines(options)
            .context("failed to request end-stop lines")?;
        Ok(Self {
            lines: Mutex::new(lines),
        })
    }
}

impl EndStops for GpioEndStops {
    fn read_both(&self) -> (bool, bool) {
        let lines = self.lines.lock().unwrap();
        match lines.get_values([false; 2]) {
            Ok([a, b]) => (!a, !b),
            // Treat a failed read as both released; the next update retries.
            Err(_) => (false, false),
        }
    }
}
