// Exit policies for open positions: polling stop-loss and duration-bucketed take-profit

use crate::types::{HoldingState, TargetPrice};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Minimum gain required to take profit after holding for `[from_hours, to_hours)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainBucket {
    pub from_hours: f64,
    /// Open-ended when absent
    #[serde(default)]
    pub to_hours: Option<f64>,
    pub min_gain: f64,
}

impl GainBucket {
    fn contains(&self, hours: f64) -> bool {
        hours >= self.from_hours && self.to_hours.map_or(true, |to| hours < to)
    }
}

/// Optional trailing/take-profit exit policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Defaults to [`TrailingStopConfig::default_buckets`] when the section omits it
    #[serde(default = "default_bucket_list")]
    pub buckets: Vec<GainBucket>,
    /// Close a profitable position once it retraces this fraction from its intraday extreme
    #[serde(default)]
    pub drawdown_from_high: Option<f64>,
}

fn default_bucket_list() -> Vec<GainBucket> {
    TrailingStopConfig::default_buckets().buckets
}

impl TrailingStopConfig {
    /// 0-1h 0.5%, 1-5h 1%, 5-10h 1.5%, 10h+ 10%. The boundaries are unconfirmed,
    /// so these only apply when a `trailing_stop` section is configured.
    pub fn default_buckets() -> Self {
        let bucket = |from_hours, to_hours, min_gain| GainBucket { from_hours, to_hours, min_gain };
        Self {
            buckets: vec![
                bucket(0.0, Some(1.0), 0.005),
                bucket(1.0, Some(5.0), 0.01),
                bucket(5.0, Some(10.0), 0.015),
                bucket(10.0, None, 0.10),
            ],
            drawdown_from_high: None,
        }
    }

    pub fn bucket_for(&self, held_for: Duration) -> Option<&GainBucket> {
        let hours = held_for.num_seconds() as f64 / 3600.0;
        self.buckets.iter().find(|b| b.contains(hours))
    }
}

/// Why a position is being closed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    StopLoss { gain: f64 },
    TakeProfit { gain: f64, min_gain: f64 },
    Drawdown { gain: f64, retrace: f64 },
}

/// Intraday price extremes seen by the loop for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntradayExtremes {
    pub high: f64,
    pub low: f64,
}

impl IntradayExtremes {
    pub fn new(price: f64) -> Self {
        Self { high: price, low: price }
    }

    pub fn update(&mut self, price: f64) {
        if price.is_finite() {
            self.high = self.high.max(price);
            self.low = self.low.min(price);
        }
    }
}

/// Inputs for evaluating one held instrument
#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
    pub price: f64,
    pub target: TargetPrice,
    pub holding: HoldingState,
    pub held_for: Duration,
    pub extremes: Option<IntradayExtremes>,
}

/// Gain relative to the breakout level the position was entered at.
/// `None` when the target is unavailable or the position is flat.
pub fn position_gain(price: f64, target: &TargetPrice, holding: HoldingState) -> Option<f64> {
    if !price.is_finite() || !target.is_available() {
        return None;
    }
    if holding.is_long() && target.long > 0.0 {
        Some((price - target.long) / target.long)
    } else if holding.is_short() && target.short > 0.0 {
        Some((target.short - price) / target.short)
    } else {
        None
    }
}

pub fn evaluate_exit(
    stop_loss_pct: Option<f64>,
    trailing: Option<&TrailingStopConfig>,
    ctx: &ExitContext,
) -> Option<ExitReason> {
    let gain = position_gain(ctx.price, &ctx.target, ctx.holding)?;

    if let Some(pct) = stop_loss_pct {
        if gain <= -pct {
            return Some(ExitReason::StopLoss { gain });
        }
    }

    let trailing = trailing?;
    if let Some(bucket) = trailing.bucket_for(ctx.held_for) {
        if gain >= bucket.min_gain {
            return Some(ExitReason::TakeProfit { gain, min_gain: bucket.min_gain });
        }
    }

    if let (Some(gap), Some(extremes)) = (trailing.drawdown_from_high, ctx.extremes) {
        let retrace = if ctx.holding.is_long() {
            1.0 - ctx.price / extremes.high
        } else {
            ctx.price / extremes.low - 1.0
        };
        if gain > 0.0 && retrace.is_finite() && retrace >= gap {
            return Some(ExitReason::Drawdown { gain, retrace });
        }
    }

    None
}
