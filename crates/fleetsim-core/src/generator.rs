// ── Telemetry generators ──
//
// A generator turns "now" into a `Reading`. Waveform generators follow a
// 360-second sine cycle keyed off wall-clock time and redraw their peak
// amplitude at every half-cycle boundary.

use std::f64::consts::PI;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::model::Reading;

/// Length of one waveform cycle, in seconds.
pub const CYCLE_SECONDS: u32 = 360;

/// Pluggable source of synthetic readings.
pub trait DataGenerator: Send {
    /// Schema tag attached to every reading, if any.
    fn schema(&self) -> Option<&str>;

    /// Produce the reading for `now` (local wall-clock time).
    fn generate(&mut self, now: DateTime<FixedOffset>) -> Reading;
}

/// Floor to one decimal place: `23.459 -> 23.4`, `-1.23 -> -1.3`.
pub fn truncate_1_decimal(value: f64) -> f64 {
    (value * 10.0).floor() / 10.0
}

/// Position of `now` within the waveform cycle, shifted by `phase_offset`.
pub fn seconds_into_cycle(now: &DateTime<FixedOffset>, phase_offset: u32) -> u32 {
    (now.num_seconds_from_midnight() + phase_offset % CYCLE_SECONDS) % CYCLE_SECONDS
}

fn rng_from(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

// ── Waveform ─────────────────────────────────────────────────────────

/// Shape of a sine-wave sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformParams {
    pub midpoint: f64,
    /// Peak amplitudes are drawn from `[0, range)`.
    pub range: f64,
    pub phase_offset: u32,
    pub schema: &'static str,
}

impl WaveformParams {
    pub const TEMPERATURE: Self = Self {
        midpoint: 15.0,
        range: 25.0,
        phase_offset: 0,
        schema: "temperature",
    };

    pub const HUMIDITY: Self = Self {
        midpoint: 70.0,
        range: 30.0,
        phase_offset: 180,
        schema: "humidity",
    };
}

/// Sine-wave generator with a randomized per-half-cycle peak.
pub struct WaveformGenerator {
    params: WaveformParams,
    peak: f64,
    rng: StdRng,
}

impl WaveformGenerator {
    pub fn new(params: WaveformParams) -> Self {
        Self::from_rng(params, rng_from(None))
    }

    pub fn with_seed(params: WaveformParams, seed: u64) -> Self {
        Self::from_rng(params, rng_from(Some(seed)))
    }

    fn from_rng(params: WaveformParams, rng: StdRng) -> Self {
        let mut generator = Self {
            params,
            peak: 0.0,
            rng,
        };
        generator.redraw_peak();
        generator
    }

    /// Current peak amplitude.
    pub fn peak(&self) -> f64 {
        self.peak
    }

    fn redraw_peak(&mut self) {
        self.peak = if self.params.range > 0.0 {
            self.rng.gen_range(0.0..self.params.range)
        } else {
            0.0
        };
    }

    /// Value at a given cycle position. Positions 0 and 180 redraw the peak.
    pub fn value_at(&mut self, seconds_into_cycle: u32) -> f64 {
        if seconds_into_cycle == 0 || seconds_into_cycle == CYCLE_SECONDS / 2 {
            self.redraw_peak();
        }
        let radians = f64::from(seconds_into_cycle) * PI / 180.0;
        truncate_1_decimal(self.params.midpoint + radians.sin() * self.peak)
    }
}

impl DataGenerator for WaveformGenerator {
    fn schema(&self) -> Option<&str> {
        Some(self.params.schema)
    }

    fn generate(&mut self, now: DateTime<FixedOffset>) -> Reading {
        let position = seconds_into_cycle(&now, self.params.phase_offset);
        Reading {
            value: self.value_at(position),
            time: now.with_timezone(&Utc),
            schema: Some(self.params.schema.to_owned()),
        }
    }
}

/// Temperature in °C: midpoint 15, range 25, in phase with the clock.
pub struct TemperatureGenerator(WaveformGenerator);

impl TemperatureGenerator {
    pub fn new() -> Self {
        Self(WaveformGenerator::new(WaveformParams::TEMPERATURE))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self(WaveformGenerator::with_seed(WaveformParams::TEMPERATURE, seed))
    }
}

impl Default for TemperatureGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative humidity in %: midpoint 70, range 30, half a cycle out of
/// phase with temperature.
pub struct HumidityGenerator(WaveformGenerator);

impl HumidityGenerator {
    pub fn new() -> Self {
        Self(WaveformGenerator::new(WaveformParams::HUMIDITY))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self(WaveformGenerator::with_seed(WaveformParams::HUMIDITY, seed))
    }
}

impl Default for HumidityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGenerator for TemperatureGenerator {
    fn schema(&self) -> Option<&str> {
        self.0.schema()
    }

    fn generate(&mut self, now: DateTime<FixedOffset>) -> Reading {
        self.0.generate(now)
    }
}

impl DataGenerator for HumidityGenerator {
    fn schema(&self) -> Option<&str> {
        self.0.schema()
    }

    fn generate(&mut self, now: DateTime<FixedOffset>) -> Reading {
        self.0.generate(now)
    }
}

// ── Uniform ──────────────────────────────────────────────────────────

/// Uniformly random Fahrenheit temperature in `[32, 212)`, untagged.
pub struct UniformGenerator {
    low: f64,
    high: f64,
    rng: StdRng,
}

impl UniformGenerator {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::build(Some(seed))
    }

    fn build(seed: Option<u64>) -> Self {
        Self {
            low: 32.0,
            high: 212.0,
            rng: rng_from(seed),
        }
    }
}

impl Default for UniformGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGenerator for UniformGenerator {
    fn schema(&self) -> Option<&str> {
        None
    }

    fn generate(&mut self, now: DateTime<FixedOffset>) -> Reading {
        Reading {
            value: self.rng.gen_range(self.low..self.high),
            time: now.with_timezone(&Utc),
            schema: None,
        }
    }
}

// ── Factory ──────────────────────────────────────────────────────────

/// Selects a generator variant by name.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GeneratorKind {
    #[default]
    Temperature,
    Humidity,
    Uniform,
}

impl GeneratorKind {
    /// Build a generator, seeded when `seed` is given.
    pub fn build(self, seed: Option<u64>) -> Box<dyn DataGenerator> {
        match (self, seed) {
            (Self::Temperature, Some(s)) => Box::new(TemperatureGenerator::with_seed(s)),
            (Self::Temperature, None) => Box::new(TemperatureGenerator::new()),
            (Self::Humidity, Some(s)) => Box::new(HumidityGenerator::with_seed(s)),
            (Self::Humidity, None) => Box::new(HumidityGenerator::new()),
            (Self::Uniform, Some(s)) => Box::new(UniformGenerator::with_seed(s)),
            (Self::Uniform, None) => Box::new(UniformGenerator::new()),
        }
    }

    pub fn schema(self) -> Option<&'static str> {
        match self {
            Self::Temperature => Some(WaveformParams::TEMPERATURE.schema),
            Self::Humidity => Some(WaveformParams::HUMIDITY.schema),
            Self::Uniform => None,
        }
    }
}
