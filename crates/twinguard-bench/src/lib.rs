//! Synthetic telemetry for the twinguard benchmarks.

use twinguard_core::TelemetrySample;
use twinguard_core::telemetry::{CORE_TEMP_K, FLOW_RATE_KG_S, PRIMARY_PRESSURE_MPA};

/// Deterministic xorshift generator; benchmark inputs must not vary between runs.
#[derive(Debug, Clone, Copy)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Quiet plant with small sensor noise around nominal.
#[must_use]
pub fn nominal_samples(n: usize, seed: u64) -> Vec<TelemetrySample> {
    let mut rng = XorShift64::new(seed);
    (0..n)
        .map(|i| {
            TelemetrySample::new(i as f64 * 0.1)
                .with_channel(CORE_TEMP_K, 595.0 + 10.0 * rng.next_f64())
                .with_channel(PRIMARY_PRESSURE_MPA, 11.8 + 0.4 * rng.next_f64())
                .with_channel(FLOW_RATE_KG_S, 55.0 + 10.0 * rng.next_f64())
        })
        .collect()
}

/// Linear excursion from nominal to a severe loss-of-flow state.
#[must_use]
pub fn excursion_samples(n: usize) -> Vec<TelemetrySample> {
    let span = n.max(1) as f64;
    (0..n)
        .map(|i| {
            let f = i as f64 / span;
            TelemetrySample::new(i as f64 * 0.1)
                .with_channel(CORE_TEMP_K, 600.0 + 400.0 * f)
                .with_channel(PRIMARY_PRESSURE_MPA, 12.0 - 10.0 * f)
                .with_channel(FLOW_RATE_KG_S, 60.0 * (1.0 - f))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_are_deterministic() {
        assert_eq!(nominal_samples(16, 9), nominal_samples(16, 9));
        let ramp = excursion_samples(10);
        assert_eq!(ramp.len(), 10);
        assert_eq!(ramp[0].channel(FLOW_RATE_KG_S), Some(60.0));
    }
}
