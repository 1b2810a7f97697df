//! Fixed linear calibrations from raw 12-bit ADC counts to physical units.

/// Full-scale ADC count for the 12-bit converters.
pub const ADC_MAX: f32 = 4095.0;

/// One linear channel calibration: `physical = raw * scale + offset`.
#[derive(Debug, Clone, Copy)]
pub struct LinearCal {
    pub scale: f32,
    pub offset: f32,
}

impl LinearCal {
    pub const fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    /// Raw counts to physical units.
    pub fn to_physical(&self, raw: u16) -> f32 {
        raw as f32 * self.scale + self.offset
    }

    /// Physical units back to the nearest raw count, clamped to the
    /// converter range.
    pub fn to_raw(&self, physical: f32) -> u16 {
        let raw = (physical - self.offset) / self.scale;
        raw.round().clamp(0.0, ADC_MAX) as u16
    }
}

/// Switch current in amperes.
pub const SWITCH_CURRENT_A: LinearCal = LinearCal::new(1000.0 / 4095.0, -471.551);
/// Switch voltage in kilovolts.
pub const SWITCH_VOLTAGE_KV: LinearCal = LinearCal::new(0.004_449_458_233, -8.939_881_545);
/// Output A voltage in kilovolts.
pub const OUTPUT_A_KV: LinearCal = LinearCal::new(0.004_447_667_531, -8.941_615_805);
/// Output B voltage in kilovolts.
pub const OUTPUT_B_KV: LinearCal = LinearCal::new(0.004_445_948_727, -8.936_364_074);
/// Temperature channel 1 in degrees Celsius.
pub const TEMP_1_DEGC: LinearCal = LinearCal::new(100.0 / 4095.0, -5.5);
