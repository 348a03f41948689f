use cost_client::domain::AccrualState;
use rust_decimal::Decimal;

use crate::{error::AccrualError, feeds::FeedState};

/// What to do when the energy counter goes backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Discard the negative increment and measure from the new reading.
    #[default]
    Rebase,
    /// Treat the rollback as a full meter reset: zero the interval totals too.
    ResetTotals,
}

/// Effect of one energy-feed update on the accrual state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyOutcome {
    /// First reading recorded, nothing accrued.
    Primed,
    Accrued { energy: Decimal, cost: Decimal },
    /// Counter went backwards; the reading became the new base.
    Rebased { previous: Decimal },
    /// Counter went backwards and the totals were zeroed.
    MeterReset { previous: Decimal },
}

/// Converts increments of a cumulative energy counter into cost.
#[derive(Debug, Clone)]
pub struct EnergyAccrualEngine {
    energy_feed: String,
    price_feed: String,
    rollback: RollbackPolicy,
    state: AccrualState,
}

impl EnergyAccrualEngine {
    pub fn new(
        energy_feed: impl Into<String>,
        price_feed: impl Into<String>,
        rollback: RollbackPolicy,
        state: AccrualState,
    ) -> Self {
        Self {
            energy_feed: energy_feed.into(),
            price_feed: price_feed.into(),
            rollback,
            state,
        }
    }

    pub fn state(&self) -> &AccrualState {
        &self.state
    }

    pub fn energy_feed(&self) -> &str {
        &self.energy_feed
    }

    pub fn price_feed(&self) -> &str {
        &self.price_feed
    }

    /// Applies a new counter reading priced at the current `price`.
    ///
    /// Both feeds are validated before the state is touched, so an error
    /// leaves the state exactly as it was.
    pub fn on_energy_update(
        &mut self,
        energy: &FeedState,
        price: &FeedState,
    ) -> Result<EnergyOutcome, AccrualError> {
        let reading = energy.reading(&self.energy_feed)?;
        let price = price.reading(&self.price_feed)?;

        let outcome = match self.state.last_energy_reading {
            None => EnergyOutcome::Primed,
            Some(previous) if reading >= previous => {
                let overflow = || AccrualError::Overflow {
                    feed: self.energy_feed.clone(),
                };
                let energy = reading.checked_sub(previous).ok_or_else(overflow)?;
                let cost = self.state.accrue(energy, price).ok_or_else(overflow)?;
                EnergyOutcome::Accrued { energy, cost }
            }
            Some(previous) => match self.rollback {
                RollbackPolicy::Rebase => EnergyOutcome::Rebased { previous },
                RollbackPolicy::ResetTotals => {
                    self.state.reset_totals();
                    EnergyOutcome::MeterReset { previous }
                }
            },
        };

        self.state.last_energy_reading = Some(reading);
        Ok(outcome)
    }

    /// Boundary or manual reset. Repeating it without an update in between
    /// has no further effect.
    pub fn reset(&mut self) {
        self.state.reset_totals();
    }
}
