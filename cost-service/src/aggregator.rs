use cost_client::domain::{attr, Interval, SensorSnapshot};
use rust_decimal::Decimal;

use crate::accrual::restore::decimal_attr;

/// Interval rollup over a never-resetting real-time cost total.
///
/// The rollup never writes to the real-time source: it remembers the total at
/// the start of its interval and reports the difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilityAggregator {
    interval: Interval,
    baseline: Decimal,
}

impl UtilityAggregator {
    pub fn new(interval: Interval, baseline: Decimal) -> Self {
        Self { interval, baseline }
    }

    /// Restores the baseline from a previous snapshot, or starts the interval
    /// at the current real-time total.
    pub fn restore(
        interval: Interval,
        snapshot: Option<&SensorSnapshot>,
        real_time_total: Decimal,
    ) -> Self {
        let baseline = snapshot
            .filter(|s| !s.is_unknown())
            .and_then(|s| decimal_attr(&s.attributes, attr::BASELINE))
            .unwrap_or(real_time_total);
        Self::new(interval, baseline)
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn baseline(&self) -> Decimal {
        self.baseline
    }

    /// Cost accrued in the current interval.
    pub fn sample(&self, real_time_total: Decimal) -> Decimal {
        real_time_total.saturating_sub(self.baseline)
    }

    pub fn on_reset_boundary(&mut self, real_time_total: Decimal) {
        self.baseline = real_time_total;
    }

    pub fn snapshot(&self, real_time_total: Decimal, unit: &str) -> SensorSnapshot {
        SensorSnapshot::new(self.sample(real_time_total).normalize().to_string())
            .with_attr(attr::BASELINE, self.baseline.normalize().to_string())
            .with_attr(attr::UNIT, unit.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn sample_is_total_minus_baseline() {
        let agg = UtilityAggregator::new(Interval::Daily, d("10.5"));
        assert_eq!(agg.sample(d("12.75")), d("2.25"));
    }

    #[test]
    fn boundary_moves_baseline_only() {
        let mut agg = UtilityAggregator::new(Interval::Monthly, d("1"));
        let total = d("7.4");
        agg.on_reset_boundary(total);

        assert_eq!(agg.baseline(), total);
        assert_eq!(agg.sample(total), Decimal::ZERO);
        assert_eq!(agg.sample(d("8.0")), d("0.6"));
    }

    #[test]
    fn restore_prefers_stored_baseline() {
        let snap = SensorSnapshot::new("0.4").with_attr(attr::BASELINE, "3.1");
        let agg = UtilityAggregator::restore(Interval::Yearly, Some(&snap), d("3.9"));
        assert_eq!(agg.baseline(), d("3.1"));
        assert_eq!(agg.sample(d("3.9")), d("0.8"));

        let fresh = UtilityAggregator::restore(Interval::Yearly, None, d("3.9"));
        assert_eq!(fresh.sample(d("3.9")), Decimal::ZERO);
    }

    #[test]
    fn snapshot_round_trips_baseline() {
        let agg = UtilityAggregator::new(Interval::Daily, d("2.5"));
        let snap = agg.snapshot(d("4"), "EUR");
        assert_eq!(snap.state, "1.5");

        let back = UtilityAggregator::restore(Interval::Daily, Some(&snap), d("100"));
        assert_eq!(back, agg);
    }
}
