//! Demo Mode - Simulated balance for testing without hardware
//!
//! Emits the same CR LF terminated text a Precisa-style balance prints in
//! continuous mode. A sample is placed on the pan every few seconds: the
//! reading drifts while unstable, settles, then the pan is emptied again.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::transport::{ReadOutcome, Transport, TransportError, TransportKind};

/// Demo balance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Milliseconds between printed lines
    pub interval_ms: u64,
    /// Heaviest simulated sample in grams
    pub max_weight: f64,
    /// Fixed RNG seed for reproducible output
    pub seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_weight: 200.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PanState {
    /// Nothing on the pan, reading near zero
    Empty { until_ms: u64 },
    /// Sample placed, reading approaching target
    Settling { target: f64, until_ms: u64 },
    /// Sample at rest
    Stable { target: f64, until_ms: u64 },
}

/// Simulated balance output
pub struct DemoScale {
    config: DemoConfig,
    rng: StdRng,
    state: PanState,
    current: f64,
    started: Instant,
    next_line_at: Instant,
    pending: Vec<u8>,
    open: bool,
}

impl DemoScale {
    /// Simulated balance with an empty pan
    pub fn new(config: DemoConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Instant::now();
        Self {
            config,
            rng,
            state: PanState::Empty { until_ms: 2000 },
            current: 0.0,
            started: now,
            next_line_at: now,
            pending: Vec::new(),
            open: true,
        }
    }

    /// Advance the pan simulation and render one protocol line
    pub fn line_at(&mut self, elapsed_ms: u64) -> String {
        self.state = match self.state {
            PanState::Empty { until_ms } if elapsed_ms >= until_ms => {
                let target = self.rng.gen_range(0.5..self.config.max_weight.max(1.0));
                PanState::Settling {
                    target,
                    until_ms: elapsed_ms + self.rng.gen_range(800..2000),
                }
            }
            PanState::Settling { target, until_ms } if elapsed_ms >= until_ms => PanState::Stable {
                target,
                until_ms: elapsed_ms + self.rng.gen_range(2000..5000),
            },
            PanState::Stable { until_ms, .. } if elapsed_ms >= until_ms => PanState::Empty {
                until_ms: elapsed_ms + self.rng.gen_range(1500..4000),
            },
            state => state,
        };

        // Occasional status chatter the extractor has to skip
        if self.rng.gen_bool(0.05) {
            return "ERROR".to_string();
        }

        let (target, flag) = match self.state {
            PanState::Empty { .. } => (0.0, "ST"),
            PanState::Settling { target, .. } => (target, "US"),
            PanState::Stable { target, .. } => (target, "ST"),
        };

        let noise = match self.state {
            PanState::Settling { .. } => self.rng.gen_range(-0.05..0.05) * target.max(1.0),
            _ => self.rng.gen_range(-0.0005..0.0005),
        };
        self.current += (target - self.current) * 0.6;
        let value = self.current + noise;

        let sign = if value < 0.0 { '-' } else { '+' };
        format!("{} {}{:>10.3} g", flag, sign, value.abs())
    }
}

#[async_trait]
impl Transport for DemoScale {
    fn kind(&self) -> TransportKind {
        TransportKind::Demo
    }

    fn describe(&self) -> String {
        "demo balance".to_string()
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        if self.pending.is_empty() {
            let now = Instant::now();
            if now < self.next_line_at {
                let wait = (self.next_line_at - now).min(timeout);
                tokio::time::sleep(wait).await;
                if Instant::now() < self.next_line_at {
                    return Ok(ReadOutcome::Data(Vec::new()));
                }
            }
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            let line = self.line_at(elapsed_ms);
            self.pending.extend_from_slice(line.as_bytes());
            self.pending.extend_from_slice(b"\r\n");
            self.next_line_at += Duration::from_millis(self.config.interval_ms.max(1));
        }

        // Hand out a random slice, as a UART FIFO would
        let take = self.rng.gen_range(1..=self.pending.len());
        let chunk: Vec<u8> = self.pending.drain(..take).collect();
        Ok(ReadOutcome::Data(chunk))
    }

    async fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
