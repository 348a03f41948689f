use cost_client::domain::AccrualState;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{error::AccrualError, feeds::FeedState};

const MILLIS_PER_HOUR: Decimal = Decimal::from_parts(3_600_000, 0, 0, false, 0);
const WATTS_PER_KILOWATT: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// How the power between two samples is estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Mean of the two samples.
    #[default]
    Trapezoidal,
    /// The earlier sample held until the next one arrives.
    Left,
    /// The newer sample applied to the whole gap.
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerUnit {
    Watt,
    Kilowatt,
}

impl PowerUnit {
    /// `kW` means kilowatts; everything else, including no unit, is watts.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(l) if l.eq_ignore_ascii_case("kw") => Self::Kilowatt,
            _ => Self::Watt,
        }
    }

    fn to_kilowatts(self, value: Decimal) -> Decimal {
        match self {
            Self::Watt => value / WATTS_PER_KILOWATT,
            Self::Kilowatt => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOutcome {
    Primed,
    Accrued { energy: Decimal, cost: Decimal },
    /// Sample carries the held sample's timestamp; only its power is taken.
    Replaced,
    /// Sample is older than the held one and was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct PowerSample {
    kilowatts: Decimal,
    at: OffsetDateTime,
}

/// Integrates instantaneous power over time into energy and prices it.
#[derive(Debug, Clone)]
pub struct PowerIntegrationEngine {
    power_feed: String,
    price_feed: String,
    unit: PowerUnit,
    method: IntegrationMethod,
    previous: Option<PowerSample>,
    state: AccrualState,
}

impl PowerIntegrationEngine {
    pub fn new(
        power_feed: impl Into<String>,
        price_feed: impl Into<String>,
        unit: PowerUnit,
        method: IntegrationMethod,
        state: AccrualState,
    ) -> Self {
        Self {
            power_feed: power_feed.into(),
            price_feed: price_feed.into(),
            unit,
            method,
            previous: None,
            state,
        }
    }

    pub fn state(&self) -> &AccrualState {
        &self.state
    }

    pub fn power_feed(&self) -> &str {
        &self.power_feed
    }

    pub fn price_feed(&self) -> &str {
        &self.price_feed
    }

    /// Unit for samples from now on. Held samples are already in kW.
    pub fn set_unit(&mut self, unit: PowerUnit) {
        self.unit = unit;
    }

    pub fn on_power_update(
        &mut self,
        power: &FeedState,
        price: &FeedState,
        at: OffsetDateTime,
    ) -> Result<PowerOutcome, AccrualError> {
        let raw = power.reading(&self.power_feed)?;
        let price = price.reading(&self.price_feed)?;

        // Export (negative power) is not consumption.
        let sample = PowerSample {
            kilowatts: self.unit.to_kilowatts(raw.max(Decimal::ZERO)),
            at,
        };

        let Some(previous) = self.previous else {
            self.previous = Some(sample);
            return Ok(PowerOutcome::Primed);
        };

        let elapsed_ms = (at - previous.at).whole_milliseconds();
        if elapsed_ms < 0 {
            return Ok(PowerOutcome::Stale);
        }
        if elapsed_ms == 0 {
            self.previous = Some(sample);
            return Ok(PowerOutcome::Replaced);
        }

        let overflow = || AccrualError::Overflow {
            feed: self.power_feed.clone(),
        };
        let elapsed_ms = Decimal::try_from_i128_with_scale(elapsed_ms, 0).map_err(|_| overflow())?;
        let hours = elapsed_ms / MILLIS_PER_HOUR;

        let kilowatts = match self.method {
            IntegrationMethod::Trapezoidal => {
                previous.kilowatts.checked_add(sample.kilowatts).ok_or_else(overflow)? / TWO
            }
            IntegrationMethod::Left => previous.kilowatts,
            IntegrationMethod::Right => sample.kilowatts,
        };
        let energy = kilowatts.checked_mul(hours).ok_or_else(overflow)?;
        let cost = self.state.accrue(energy, price).ok_or_else(overflow)?;

        self.previous = Some(sample);
        Ok(PowerOutcome::Accrued { energy, cost })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn val(s: &str) -> FeedState {
        FeedState::Reported(s.to_string())
    }

    fn engine(method: IntegrationMethod) -> PowerIntegrationEngine {
        PowerIntegrationEngine::new(
            "sensor.heatpump_power",
            "sensor.price",
            PowerUnit::Watt,
            method,
            AccrualState::new(None, "EUR"),
        )
    }

    #[test]
    fn one_kilowatt_for_an_hour_costs_the_hourly_price() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = engine(IntegrationMethod::Trapezoidal);

        let primed = e.on_power_update(&val("1000"), &val("0.20"), t0).unwrap();
        assert_eq!(primed, PowerOutcome::Primed);
        let out = e
            .on_power_update(&val("1000"), &val("0.20"), t0 + Duration::seconds(3600))
            .unwrap();

        assert_eq!(out, PowerOutcome::Accrued { energy: d("1"), cost: d("0.20") });
        assert_eq!(e.state().running_cost, d("0.20"));
        assert_eq!(e.state().cumulative_energy, d("1"));
    }

    #[test]
    fn methods_differ_on_a_ramp() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let t1 = t0 + Duration::hours(1);

        let mut trap = engine(IntegrationMethod::Trapezoidal);
        let mut left = engine(IntegrationMethod::Left);
        let mut right = engine(IntegrationMethod::Right);
        for e in [&mut trap, &mut left, &mut right] {
            e.on_power_update(&val("0"), &val("1"), t0).unwrap();
            e.on_power_update(&val("1000"), &val("1"), t1).unwrap();
        }

        assert_eq!(trap.state().cumulative_energy, d("0.5"));
        assert_eq!(left.state().cumulative_energy, Decimal::ZERO);
        assert_eq!(right.state().cumulative_energy, d("1"));
    }

    #[test]
    fn kilowatt_feeds_are_not_rescaled() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = PowerIntegrationEngine::new(
            "p",
            "price",
            PowerUnit::from_label(Some("kW")),
            IntegrationMethod::Left,
            AccrualState::new(None, "EUR"),
        );
        e.on_power_update(&val("2"), &val("0.5"), t0).unwrap();
        e.on_power_update(&val("2"), &val("0.5"), t0 + Duration::minutes(30)).unwrap();

        assert_eq!(e.state().cumulative_energy, d("1"));
        assert_eq!(e.state().running_cost, d("0.5"));
    }

    #[test]
    fn unavailable_price_skips_without_touching_state() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = engine(IntegrationMethod::Left);
        e.on_power_update(&val("500"), &val("0.2"), t0).unwrap();
        let before = e.state().clone();

        let res = e.on_power_update(&val("500"), &FeedState::Unavailable, t0 + Duration::hours(1));
        assert!(matches!(res, Err(AccrualError::FeedUnavailable { .. })));
        assert_eq!(e.state(), &before);

        // The held sample still spans the whole gap.
        e.on_power_update(&val("500"), &val("0.2"), t0 + Duration::hours(2)).unwrap();
        assert_eq!(e.state().cumulative_energy, d("1"));
    }

    #[test]
    fn negative_power_and_stale_timestamps_never_accrue() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = engine(IntegrationMethod::Trapezoidal);
        e.on_power_update(&val("-800"), &val("0.2"), t0).unwrap();
        e.on_power_update(&val("-800"), &val("0.2"), t0 + Duration::hours(1)).unwrap();
        assert_eq!(e.state().cumulative_energy, Decimal::ZERO);

        let out = e.on_power_update(&val("800"), &val("0.2"), t0).unwrap();
        assert_eq!(out, PowerOutcome::Stale);
        assert_eq!(e.state().cumulative_energy, Decimal::ZERO);

        let same_instant = t0 + Duration::hours(1);
        let out = e.on_power_update(&val("800"), &val("0.2"), same_instant).unwrap();
        assert_eq!(out, PowerOutcome::Replaced);
        assert_eq!(e.state().cumulative_energy, Decimal::ZERO);
    }

    #[test]
    fn out_of_order_sample_does_not_reopen_an_accrued_span() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = engine(IntegrationMethod::Left);
        let price = val("1");

        e.on_power_update(&val("1000"), &price, t0).unwrap();
        e.on_power_update(&val("1000"), &price, t0 + Duration::hours(1)).unwrap();
        let out = e
            .on_power_update(&val("1000"), &price, t0 + Duration::minutes(30))
            .unwrap();
        assert_eq!(out, PowerOutcome::Stale);
        e.on_power_update(&val("1000"), &price, t0 + Duration::hours(2)).unwrap();

        assert_eq!(e.state().cumulative_energy, d("2"));
        assert_eq!(e.state().running_cost, d("2"));
    }

    #[test]
    fn oversized_power_is_skipped_instead_of_overflowing() {
        let t0 = datetime!(2024-03-01 10:00:00 UTC);
        let mut e = PowerIntegrationEngine::new(
            "sensor.heatpump_power",
            "sensor.price",
            PowerUnit::Kilowatt,
            IntegrationMethod::Trapezoidal,
            AccrualState::new(None, "EUR"),
        );
        e.on_power_update(&val("7e28"), &val("1"), t0).unwrap();
        let before = e.state().clone();

        let res = e.on_power_update(&val("7e28"), &val("1"), t0 + Duration::hours(2));
        assert_eq!(
            res,
            Err(AccrualError::Overflow {
                feed: "sensor.heatpump_power".into()
            })
        );
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn unit_label_parsing() {
        assert_eq!(PowerUnit::from_label(Some("W")), PowerUnit::Watt);
        assert_eq!(PowerUnit::from_label(Some(" kw ")), PowerUnit::Kilowatt);
        assert_eq!(PowerUnit::from_label(None), PowerUnit::Watt);
    }
}
