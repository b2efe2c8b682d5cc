//! Stateful aquarium water simulator for local development.
//!
//! Models what the controller's probes would report:
//! - Temporal coherence via random walk with mean reversion
//! - Per-reading probe noise
//! - Occasional spikes (loose probe, air bubble)
//! - Operator nudges that move the water toward a new set point
//! - A feeder that sometimes jams

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Tropical tank held near 25.5 °C / pH 7.0 by a working heater.
    Stable,
    /// Heater stuck on: temperature creeps upward, pH sags slowly.
    Warming,
    /// Noisy probes and a feeder that jams one time in ten.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "warming" => Self::Warming,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Warming => write!(f, "warming"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// One probe channel
// ---------------------------------------------------------------------------

struct Channel {
    /// Current "true" value of the water.
    base: f64,
    /// Value the tank's equipment pulls toward.
    center: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    /// Physically possible probe range.
    min: f64,
    max: f64,
}

impl Channel {
    fn sample(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base = (self.base + self.drift_per_sample + pull + walk).clamp(self.min, self.max);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        (self.base + noise + spike).clamp(self.min, self.max)
    }

    /// Move the water (and what the equipment holds it at) to `value`.
    fn nudge(&mut self, value: f64) {
        let value = value.clamp(self.min, self.max);
        self.base = value;
        self.center = value;
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct WaterSim {
    temperature: Channel,
    ph: Channel,
    jam_prob: f32,
}

impl WaterSim {
    pub fn new(scenario: Scenario) -> Self {
        // (drift, walk, reversion, noise, spike_prob, spike_sigma)
        let (t, p, jam_prob) = match scenario {
            Scenario::Stable => (
                (0.0, 0.03, 0.10, 0.02, 0.005_f32, 0.5),
                (0.0, 0.005, 0.10, 0.005, 0.005_f32, 0.2),
                0.02_f32,
            ),
            Scenario::Warming => (
                (0.05, 0.05, 0.0, 0.03, 0.01, 0.5),
                (-0.004, 0.01, 0.0, 0.01, 0.01, 0.2),
                0.02,
            ),
            Scenario::Flaky => (
                (0.0, 0.10, 0.05, 0.15, 0.10, 2.0),
                (0.0, 0.03, 0.05, 0.05, 0.10, 1.0),
                0.10,
            ),
        };
        let channel = |start: f64, min: f64, max: f64, params: (f64, f64, f64, f64, f32, f64)| {
            let (drift, walk, reversion, noise, spike_prob, spike_sigma) = params;
            Channel {
                base: start,
                center: start,
                drift_per_sample: drift,
                walk_sigma: walk,
                mean_reversion: reversion,
                noise_sigma: noise,
                spike_prob,
                spike_sigma,
                min,
                max,
            }
        };
        Self {
            temperature: channel(25.5, 0.0, 40.0, t),
            ph: channel(7.0, 0.0, 14.0, p),
            jam_prob,
        }
    }

    /// Next temperature reading in °C.  Evolves the water.
    pub fn sample_temperature(&mut self) -> f64 {
        self.temperature.sample()
    }

    /// Next pH reading.  Evolves the water.
    pub fn sample_ph(&mut self) -> f64 {
        self.ph.sample()
    }

    pub fn nudge_temperature(&mut self, celsius: f64) {
        self.temperature.nudge(celsius);
    }

    pub fn nudge_ph(&mut self, ph: f64) {
        self.ph.nudge(ph);
    }

    /// Run the feeder once.  `false` means it jammed.
    pub fn feed(&mut self) -> bool {
        fastrand::f32() >= self.jam_prob
    }
}

// ===========================================================================
// Tests
// ===========================================================================
