/// Synthetic system metrics for the dashboard.
///
/// These numbers are generated, not measured. The dashboard shows them to
/// give the operator a plausible sense of load while the pipeline runs;
/// they are regenerated once per second and are not part of any contract.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage: f64,   // percent
    pub memory_mb: f64,   // resident MB
    pub latency_ms: f64,  // round-trip estimate
    pub fps: f64,         // perceived analysis rate
    pub confidence: f64,  // 0.0..=1.0
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_mb: 0.0,
            latency_ms: 0.0,
            fps: 0.0,
            confidence: 0.0,
        }
    }
}

pub struct SyntheticStats {
    rng: fastrand::Rng,
}

impl Default for SyntheticStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticStats {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Draw the next sample. Assistant speech adds a visible CPU bump.
    pub fn sample(&mut self, speaking: bool) -> SystemMetrics {
        SystemMetrics {
            cpu_usage: 20.0 + self.rng.f64() * 30.0 + if speaking { 20.0 } else { 0.0 },
            memory_mb: 450.0 + self.rng.f64() * 50.0,
            latency_ms: 150.0 + self.rng.f64() * 100.0,
            fps: 24.0 + self.rng.f64() * 6.0,
            confidence: 0.85 + self.rng.f64() * 0.14,
        }
    }
}
