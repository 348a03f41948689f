use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Interval;

/// Accrued cost bookkeeping for a single sensor instance.
///
/// `interval` is `None` for the real-time accrual of the power path, which
/// never resets; interval rollups of that path difference against it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualState {
    pub running_cost: Decimal,
    pub cumulative_energy: Decimal,
    pub last_energy_reading: Option<Decimal>,
    pub unit_label: String,
    pub interval: Option<Interval>,
}

impl AccrualState {
    pub fn new(interval: Option<Interval>, unit_label: impl Into<String>) -> Self {
        Self {
            running_cost: Decimal::ZERO,
            cumulative_energy: Decimal::ZERO,
            last_energy_reading: None,
            unit_label: unit_label.into(),
            interval,
        }
    }

    /// Adds `energy * price` to the running cost and returns the cost increment.
    ///
    /// Returns `None` and leaves both totals untouched when the product or
    /// either sum does not fit in a `Decimal`. Callers must only pass
    /// non-negative energy; rollbacks are resolved before reaching this point.
    pub fn accrue(&mut self, energy: Decimal, price: Decimal) -> Option<Decimal> {
        debug_assert!(!energy.is_sign_negative() || energy.is_zero());
        let cost = energy.checked_mul(price)?;
        let running_cost = self.running_cost.checked_add(cost)?;
        let cumulative_energy = self.cumulative_energy.checked_add(energy)?;

        self.running_cost = running_cost;
        self.cumulative_energy = cumulative_energy;
        Some(cost)
    }

    /// Zeroes the interval totals. The last counter reading is kept so the
    /// next increment is measured against the upstream counter.
    pub fn reset_totals(&mut self) {
        self.running_cost = Decimal::ZERO;
        self.cumulative_energy = Decimal::ZERO;
    }

    pub fn average_cost_per_unit(&self) -> Decimal {
        if self.cumulative_energy > Decimal::ZERO {
            self.running_cost
                .checked_div(self.cumulative_energy)
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrue_adds_price_times_energy() {
        let mut s = AccrualState::new(Some(Interval::Daily), "EUR");
        let cost = s.accrue(Decimal::new(25, 1), Decimal::new(30, 2));

        assert_eq!(cost, Some(Decimal::new(75, 2)));
        assert_eq!(s.running_cost, Decimal::new(75, 2));
        assert_eq!(s.cumulative_energy, Decimal::new(25, 1));
    }

    #[test]
    fn reset_keeps_last_reading() {
        let mut s = AccrualState::new(Some(Interval::Monthly), "EUR");
        s.last_energy_reading = Some(Decimal::new(1000, 1));
        s.accrue(Decimal::ONE, Decimal::ONE).unwrap();

        s.reset_totals();
        let once = s.clone();
        s.reset_totals();

        assert_eq!(s, once);
        assert_eq!(s.running_cost, Decimal::ZERO);
        assert_eq!(s.cumulative_energy, Decimal::ZERO);
        assert_eq!(s.last_energy_reading, Some(Decimal::new(1000, 1)));
    }

    #[test]
    fn average_cost_is_zero_without_energy() {
        let s = AccrualState::new(None, "EUR");
        assert_eq!(s.average_cost_per_unit(), Decimal::ZERO);

        let mut s = s;
        s.accrue(Decimal::new(4, 0), Decimal::new(25, 2)).unwrap();
        assert_eq!(s.average_cost_per_unit(), Decimal::new(25, 2));
    }

    #[test]
    fn overflowing_accrual_leaves_totals_untouched() {
        let mut s = AccrualState::new(Some(Interval::Daily), "EUR");
        s.accrue(Decimal::ONE, Decimal::ONE).unwrap();
        let before = s.clone();

        let huge = Decimal::from_scientific("1e20").unwrap();
        assert_eq!(s.accrue(huge, Decimal::from_scientific("1e9").unwrap()), None);
        assert_eq!(s, before);

        // Product fits but the running sum would not.
        s.running_cost = Decimal::MAX;
        let before = s.clone();
        assert_eq!(s.accrue(Decimal::ONE, Decimal::ONE), None);
        assert_eq!(s, before);
    }

    #[test]
    fn average_cost_does_not_panic_on_tiny_energy() {
        let mut s = AccrualState::new(None, "EUR");
        s.running_cost = Decimal::MAX;
        s.cumulative_energy = Decimal::new(1, 28);
        assert_eq!(s.average_cost_per_unit(), Decimal::ZERO);
    }
}
