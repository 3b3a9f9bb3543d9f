//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{ConfigBuilder, ParabolaBuilder};
use labdaq::config::CorrelationMode;

#[test]
fn test_infrastructure_setup() {
    let config = ConfigBuilder::new().settle_ms(25).timeout_ms(500).build();
    assert_eq!(
        config.protocol.correlation,
        CorrelationMode::Settle { delay_ms: 25 }
    );
    assert_eq!(config.command.timeout_ms, 500);
    assert_eq!(config.command.idle_poll_ms, 1);

    let series = ParabolaBuilder::new("p").coefficients(1.0, 1.0, 1.0).build();
    assert_eq!(series.len(), 5);
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}

#[test]
fn test_wait_until() {
    let mut calls = 0;
    assert!(common::wait_until(|| {
        calls += 1;
        calls > 3
    }));
}
