//! Test data builders for creating test objects

use labdaq::analysis::{MeasurementSeries, PairedMeasurements};
use labdaq::config::{AppConfig, CorrelationMode};

/// Builder for test configurations
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.command.idle_poll_ms = 1;
        Self { config }
    }

    pub fn correlation(mut self, mode: CorrelationMode) -> Self {
        self.config.protocol.correlation = mode;
        self
    }

    pub fn settle_ms(self, delay_ms: u64) -> Self {
        self.correlation(CorrelationMode::Settle { delay_ms })
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.command.timeout_ms = timeout_ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

/// Builder for series sampled from a known parabola
pub struct ParabolaBuilder {
    label: String,
    a: f64,
    b: f64,
    c: f64,
    xs: Vec<f64>,
}

impl ParabolaBuilder {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            a: 0.0,
            b: 0.0,
            c: 0.0,
            xs: (0..5).map(f64::from).collect(),
        }
    }

    pub fn coefficients(mut self, a: f64, b: f64, c: f64) -> Self {
        self.a = a;
        self.b = b;
        self.c = c;
        self
    }

    pub fn xs(mut self, xs: &[f64]) -> Self {
        self.xs = xs.to_vec();
        self
    }

    fn y(&self, x: f64) -> f64 {
        self.a * x * x + self.b * x + self.c
    }

    pub fn build(self) -> MeasurementSeries {
        let points: Vec<(f64, f64)> = self.xs.iter().map(|&x| (x, self.y(x))).collect();
        MeasurementSeries::from_points(self.label, points)
    }
}

/// Pair two parabolas over the same abscissae
pub fn paired_parabolas(first: (f64, f64, f64), second: (f64, f64, f64), xs: &[f64]) -> PairedMeasurements {
    let mut paired = PairedMeasurements::new("first", "second");
    for &x in xs {
        let a = first.0 * x * x + first.1 * x + first.2;
        let b = second.0 * x * x + second.1 * x + second.2;
        paired.push(x, Some(a), Some(b));
    }
    paired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parabola_builder() {
        let series = ParabolaBuilder::new("p")
            .coefficients(1.0, 0.0, 1.0)
            .xs(&[2.0, 0.0, 1.0])
            .build();

        assert_eq!(series.label, "p");
        assert_eq!(series.points(), &[(0.0, 1.0), (1.0, 2.0), (2.0, 5.0)]);
    }
}
