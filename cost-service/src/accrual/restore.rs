use std::str::FromStr;

use cost_client::domain::{attr, AccrualState, Interval, SensorSnapshot};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

pub const DEFAULT_CURRENCY: &str = "EUR";

/// Currency part of a price unit such as `EUR/kWh`.
pub fn currency_from_price_unit(unit: Option<&str>) -> Option<String> {
    let currency = unit?.split('/').next()?.trim();
    if currency.is_empty() {
        None
    } else {
        Some(currency.to_string())
    }
}

/// Reads a decimal attribute, accepting JSON numbers and numeric strings.
/// Anything else counts as absent.
pub fn decimal_attr(attributes: &Map<String, Value>, key: &str) -> Option<Decimal> {
    match attributes.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn string_attr(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    match attributes.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Numeric state of a snapshot, or `None` when it is unknown or unparseable.
pub fn snapshot_value(snapshot: &SensorSnapshot) -> Option<Decimal> {
    if snapshot.is_unknown() {
        return None;
    }
    Decimal::from_str(snapshot.state.trim()).ok()
}

/// Rebuilds accrual state from a persisted snapshot.
///
/// Without a usable snapshot the state starts from zero. Individual
/// attributes that are missing or have the wrong type fall back to their
/// defaults without discarding the rest of the snapshot. `price_unit` is the
/// price feed's unit metadata, used whenever no stored unit is available.
pub fn restore_state(
    snapshot: Option<&SensorSnapshot>,
    interval: Option<Interval>,
    price_unit: Option<&str>,
) -> AccrualState {
    let derived_unit = || {
        currency_from_price_unit(price_unit).unwrap_or_else(|| {
            tracing::warn!(
                default = DEFAULT_CURRENCY,
                "price feed has no usable unit of measurement, using default currency"
            );
            DEFAULT_CURRENCY.to_string()
        })
    };

    let restored = snapshot.and_then(|s| snapshot_value(s).map(|v| (s, v)));
    let Some((snapshot, running_cost)) = restored else {
        return AccrualState::new(interval, derived_unit());
    };

    let attrs = &snapshot.attributes;
    let cumulative_energy = decimal_attr(attrs, attr::CUMULATIVE_ENERGY)
        .filter(|e| !e.is_sign_negative())
        .unwrap_or(Decimal::ZERO);

    AccrualState {
        running_cost,
        cumulative_energy,
        last_energy_reading: decimal_attr(attrs, attr::LAST_ENERGY_READING),
        unit_label: string_attr(attrs, attr::UNIT).unwrap_or_else(derived_unit),
        interval,
    }
}

/// Snapshot written after every mutation of an accrual state.
pub fn state_snapshot(state: &AccrualState) -> SensorSnapshot {
    SensorSnapshot::new(state.running_cost.normalize().to_string())
        .with_attr(attr::CUMULATIVE_ENERGY, state.cumulative_energy.normalize().to_string())
        .with_attr(
            attr::LAST_ENERGY_READING,
            state
                .last_energy_reading
                .map(|r| Value::from(r.normalize().to_string()))
                .unwrap_or(Value::Null),
        )
        .with_attr(attr::UNIT, state.unit_label.clone())
        .with_attr(attr::AVERAGE_COST, state.average_cost_per_unit().normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn currency_is_taken_before_the_slash() {
        assert_eq!(currency_from_price_unit(Some("EUR/kWh")).as_deref(), Some("EUR"));
        assert_eq!(currency_from_price_unit(Some(" SEK / kWh")).as_deref(), Some("SEK"));
        assert_eq!(currency_from_price_unit(Some("/kWh")), None);
        assert_eq!(currency_from_price_unit(None), None);
    }

    #[test]
    fn missing_snapshot_uses_price_unit_or_default() {
        let s = restore_state(None, Some(Interval::Daily), Some("NOK/kWh"));
        assert_eq!(s, AccrualState::new(Some(Interval::Daily), "NOK"));

        let s = restore_state(None, Some(Interval::Daily), None);
        assert_eq!(s.unit_label, DEFAULT_CURRENCY);
    }

    #[test]
    fn unknown_snapshot_is_treated_as_missing() {
        let snap = SensorSnapshot::new("unavailable").with_attr(attr::CUMULATIVE_ENERGY, "5");
        let s = restore_state(Some(&snap), Some(Interval::Yearly), Some("EUR/kWh"));
        assert_eq!(s, AccrualState::new(Some(Interval::Yearly), "EUR"));
    }

    #[test]
    fn round_trip_reproduces_state() {
        let mut before = AccrualState::new(Some(Interval::Monthly), "GBP");
        before.last_energy_reading = Some(d("105.0"));
        before.accrue(d("6.5"), d("0.30")).unwrap();

        let snap = state_snapshot(&before);
        let json = serde_json::to_string(&snap).unwrap();
        let stored: SensorSnapshot = serde_json::from_str(&json).unwrap();
        let restored = restore_state(Some(&stored), Some(Interval::Monthly), Some("EUR/kWh"));

        assert_eq!(restored, before);
    }

    #[test]
    fn mistyped_fields_are_absent_but_others_survive() {
        let snap = SensorSnapshot::new("1.95")
            .with_attr(attr::CUMULATIVE_ENERGY, json!({"bogus": true}))
            .with_attr(attr::LAST_ENERGY_READING, 105.0)
            .with_attr(attr::UNIT, 42);

        let s = restore_state(Some(&snap), Some(Interval::Daily), Some("EUR/kWh"));
        assert_eq!(s.running_cost, d("1.95"));
        assert_eq!(s.cumulative_energy, Decimal::ZERO);
        assert_eq!(s.last_energy_reading, Some(d("105")));
        assert_eq!(s.unit_label, "EUR");
    }
}
