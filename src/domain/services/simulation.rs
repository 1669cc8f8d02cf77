//! Metric variation algorithms.
//!
//! Everything here is pure: [`tick`] takes the previous snapshot and a random
//! source and returns the next snapshot. The runtime that drives it on a timer
//! lives in `application::actors::simulation_actor`.

use rand::Rng;
use std::collections::BTreeMap;

use crate::domain::entities::metric::{MetricClass, SimulatedMetric};

/// Maximum distance of a temperature from its base, in the metric's own units.
pub const TEMPERATURE_SPAN: f64 = 5.0;

/// Blend weights: share of the randomized target mixed into the next value.
const TEMPERATURE_BLEND: f64 = 0.3;
const ENERGY_BLEND: f64 = 0.3;
const OCCUPANCY_BLEND: f64 = 0.2;
const PERCENTAGE_BLEND: f64 = 0.3;

/// Probability that an alert/maintenance counter moves on a given tick.
const ALERT_STEP_PROBABILITY: f64 = 0.15;

/// Per-metric synthetic state, keyed by metric title.
///
/// Grows monotonically for the lifetime of the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationSnapshot {
    metrics: BTreeMap<String, SimulatedMetric>,
}

impl SimulationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` with `initial` as both current and base value, unless it is already tracked.
    pub fn observe(&mut self, key: &str, initial: f64) -> &SimulatedMetric {
        self.metrics
            .entry(key.to_string())
            .or_insert_with(|| SimulatedMetric::new(key, initial))
    }

    pub fn get(&self, key: &str) -> Option<&SimulatedMetric> {
        self.metrics.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.metrics.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimulatedMetric> {
        self.metrics.values()
    }

    /// Overwrite the current value with a server-supplied one.
    ///
    /// Unseen metrics are registered with `value` as their base.
    pub fn apply_authoritative(&mut self, key: &str, value: f64) {
        match self.metrics.get_mut(key) {
            Some(metric) => metric.advance_to(value),
            None => {
                self.metrics
                    .insert(key.to_string(), SimulatedMetric::new(key, value));
            }
        }
    }
}

/// Advance every tracked metric by one step.
pub fn tick<R: Rng + ?Sized>(previous: &SimulationSnapshot, rng: &mut R) -> SimulationSnapshot {
    let mut next = previous.clone();
    for metric in next.metrics.values_mut() {
        let value = next_value(metric.class(), metric.current_value, metric.base_value, rng);
        metric.advance_to(value);
    }
    next
}

/// Next value for one metric of the given class.
pub fn next_value<R: Rng + ?Sized>(class: MetricClass, current: f64, base: f64, rng: &mut R) -> f64 {
    match class {
        MetricClass::Temperature => vary_temperature(current, base, rng),
        MetricClass::Energy => vary_energy(current, base, rng),
        MetricClass::AlertCount => vary_alert_count(current, base, rng),
        MetricClass::Occupancy => vary_occupancy(current, base, rng),
        MetricClass::Percentage => vary_percentage(current, base, rng),
    }
}

fn blend(current: f64, target: f64, weight: f64) -> f64 {
    current * (1.0 - weight) + target * weight
}

/// Clamp without panicking on inverted or NaN bounds.
fn bounded(value: f64, lo: f64, hi: f64) -> f64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if value.is_nan() {
        return lo;
    }
    value.max(lo).min(hi)
}

fn vary_temperature<R: Rng + ?Sized>(current: f64, base: f64, rng: &mut R) -> f64 {
    let target = base + rng.gen_range(-2.0..=2.0);
    bounded(
        blend(current, target, TEMPERATURE_BLEND),
        base - TEMPERATURE_SPAN,
        base + TEMPERATURE_SPAN,
    )
}

fn vary_energy<R: Rng + ?Sized>(current: f64, base: f64, rng: &mut R) -> f64 {
    let target = base * (1.0 + rng.gen_range(-0.15..=0.15));
    let value = bounded(blend(current, target, ENERGY_BLEND), base * 0.5, base * 1.5);
    if base >= 0.0 {
        value.max(0.0)
    } else {
        value
    }
}

fn vary_alert_count<R: Rng + ?Sized>(current: f64, base: f64, rng: &mut R) -> f64 {
    let current = current.round();
    let ceiling = (base * 2.0).max(base + 5.0).max(0.0);

    if !rng.gen_bool(ALERT_STEP_PROBABILITY) {
        return bounded(current, 0.0, ceiling);
    }

    // Lean back toward the base count.
    let down_probability = if current > base {
        0.7
    } else if current < base {
        0.3
    } else {
        0.5
    };
    let step = if rng.gen_bool(down_probability) { -1.0 } else { 1.0 };
    bounded(current + step, 0.0, ceiling)
}

fn vary_occupancy<R: Rng + ?Sized>(current: f64, base: f64, rng: &mut R) -> f64 {
    let target = base * (1.0 + rng.gen_range(-0.2..=0.2));
    let ceiling = (base * 1.5).ceil().max(1.0);
    bounded(blend(current, target, OCCUPANCY_BLEND).round(), 0.0, ceiling)
}

fn vary_percentage<R: Rng + ?Sized>(current: f64, base: f64, rng: &mut R) -> f64 {
    let target = base + rng.gen_range(-5.0..=5.0);
    let lo = bounded(base * 0.8, 0.0, 100.0);
    let hi = bounded(base * 1.2, 0.0, 100.0);
    bounded(blend(current, target, PERCENTAGE_BLEND), lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::metric::Trend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn snapshot_with(key: &str, value: f64) -> SimulationSnapshot {
        let mut snapshot = SimulationSnapshot::new();
        snapshot.observe(key, value);
        snapshot
    }

    #[test]
    fn test_temperature_stays_within_five_units_of_base() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut snapshot = snapshot_with("Zone Temp", 22.0);
            for _ in 0..500 {
                snapshot = tick(&snapshot, &mut rng);
                let metric = snapshot.get("Zone Temp").unwrap();
                assert!(
                    (17.0..=27.0).contains(&metric.current_value),
                    "seed {seed}: {} escaped [17, 27]",
                    metric.current_value
                );
                assert_eq!(metric.base_value, 22.0);
            }
        }
    }

    #[test]
    fn test_temperature_clamps_values_far_from_base() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = next_value(MetricClass::Temperature, 40.0, 22.0, &mut rng);
        assert_eq!(value, 27.0);
    }

    #[test]
    fn test_percentage_respects_zero_to_hundred() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut snapshot = snapshot_with("Lighting Efficiency %", 98.0);
        for _ in 0..500 {
            snapshot = tick(&snapshot, &mut rng);
            let value = snapshot.get("Lighting Efficiency %").unwrap().current_value;
            assert!((78.0..=100.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_alert_count_stays_integral_and_non_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut snapshot = snapshot_with("Active Alerts", 2.0);
        for _ in 0..1000 {
            snapshot = tick(&snapshot, &mut rng);
            let value = snapshot.get("Active Alerts").unwrap().current_value;
            assert_eq!(value, value.round());
            assert!((0.0..=7.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_occupancy_is_whole_people() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut snapshot = snapshot_with("Floor Occupancy", 120.0);
        for _ in 0..300 {
            snapshot = tick(&snapshot, &mut rng);
            let value = snapshot.get("Floor Occupancy").unwrap().current_value;
            assert_eq!(value, value.round());
            assert!((0.0..=180.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_energy_never_negative_and_bounded() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut snapshot = snapshot_with("Energy Consumption", 1250.0);
        for _ in 0..300 {
            snapshot = tick(&snapshot, &mut rng);
            let value = snapshot.get("Energy Consumption").unwrap().current_value;
            assert!((625.0..=1875.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_tick_is_pure() {
        let snapshot = snapshot_with("Zone Temp", 22.0);
        let mut rng = StdRng::seed_from_u64(1);
        let _ = tick(&snapshot, &mut rng);
        assert_eq!(snapshot.get("Zone Temp").unwrap().current_value, 22.0);
    }

    #[test]
    fn test_same_seed_same_values() {
        let snapshot = snapshot_with("Zone Temp", 22.0);
        let a = tick(&snapshot, &mut StdRng::seed_from_u64(42));
        let b = tick(&snapshot, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_observe_does_not_rebase() {
        let mut snapshot = snapshot_with("Zone Temp", 22.0);
        snapshot.observe("Zone Temp", 30.0);
        assert_eq!(snapshot.get("Zone Temp").unwrap().base_value, 22.0);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_apply_authoritative_sets_value_and_trend() {
        let mut snapshot = snapshot_with("Zone Temp", 22.0);
        snapshot.apply_authoritative("Zone Temp", 21.0);
        let metric = snapshot.get("Zone Temp").unwrap();
        assert_eq!(metric.current_value, 21.0);
        assert_eq!(metric.base_value, 22.0);
        assert_eq!(metric.last_trend, Trend::Down);

        snapshot.apply_authoritative("Active Alerts", 4.0);
        assert_eq!(snapshot.get("Active Alerts").unwrap().base_value, 4.0);
    }

    #[test]
    fn test_bounded_tolerates_inverted_bounds() {
        assert_eq!(bounded(5.0, 10.0, 0.0), 5.0);
        assert_eq!(bounded(f64::NAN, 0.0, 1.0), 0.0);
        assert_eq!(bounded(-1.0, 0.0, 1.0), 0.0);
    }
}
