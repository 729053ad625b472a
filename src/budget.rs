// Budget / margin allocation and order sizing

use crate::types::Instrument;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How free balance is spread across the universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// free_balance / unheld slots
    Equal,
    /// Share of the prior-day trading value of the universe
    VolumeWeighted,
}

/// Budget snapshot taken when a session opens
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetPlan {
    pub policy: AllocationPolicy,
    /// Maximum number of simultaneously held instruments
    pub slots: usize,
    /// Free balance observed right after the session reset
    pub capital_at_open: Decimal,
    pub weights: HashMap<Instrument, f64>,
}

impl BudgetPlan {
    pub fn new(
        policy: AllocationPolicy,
        slots: usize,
        capital_at_open: Decimal,
        trading_values: &HashMap<Instrument, f64>,
    ) -> Self {
        Self {
            policy,
            slots,
            capital_at_open,
            weights: volume_weights(trading_values),
        }
    }

    /// Capital available for one entry into `instrument`, given the freshest free balance.
    pub fn budget_for(&self, instrument: &Instrument, free_balance: Decimal, held_count: usize) -> Decimal {
        match self.policy {
            AllocationPolicy::Equal => equal_share(free_balance, self.slots, held_count),
            AllocationPolicy::VolumeWeighted => {
                if free_balance <= Decimal::ZERO || held_count >= self.slots {
                    return Decimal::ZERO;
                }
                let weight = self.weights.get(instrument).copied().unwrap_or(0.0);
                let share = Decimal::from_f64(weight).unwrap_or_default() * self.capital_at_open;
                share.min(free_balance).max(Decimal::ZERO)
            }
        }
    }
}

/// Equal division over the slots that are not held yet; 0 once every slot is filled.
pub fn equal_share(free_balance: Decimal, slots: usize, held_count: usize) -> Decimal {
    let open_slots = slots.saturating_sub(held_count);
    if open_slots == 0 || free_balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    free_balance / Decimal::from(open_slots)
}

/// Normalize trading values into weights summing to 1. A zero total gives all-zero weights.
pub fn volume_weights(trading_values: &HashMap<Instrument, f64>) -> HashMap<Instrument, f64> {
    let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
    let total: f64 = trading_values.values().map(|v| clean(*v)).sum();
    trading_values
        .iter()
        .map(|(instrument, value)| {
            let weight = if total > 0.0 { clean(*value) / total } else { 0.0 };
            (instrument.clone(), weight)
        })
        .collect()
}

/// Futures quantity: (budget / price) * leverage * safety_factor
pub fn leveraged_quantity(budget: Decimal, price: f64, leverage: u32, safety_factor: Decimal) -> Decimal {
    let price = match Decimal::from_f64(price) {
        Some(p) if p > Decimal::ZERO => p,
        _ => return Decimal::ZERO,
    };
    if budget <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    budget / price * Decimal::from(leverage) * safety_factor
}

/// Quote amount for a spot market buy after reserving the trading fee
pub fn spot_spend(budget: Decimal, fee_rate: Decimal) -> Decimal {
    if budget <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    budget - budget * fee_rate
}
