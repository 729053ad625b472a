// Breakout target calculation (Larry Williams volatility breakout)

use crate::types::{DailyCandle, TargetPrice};

/// Compute today's breakout band from a daily candle history (oldest first).
///
/// The last row may still be forming at the data source, so the second-to-last
/// row is treated as "yesterday". Anything unusable yields
/// [`TargetPrice::UNAVAILABLE`].
pub fn compute_target(candles: &[DailyCandle], k: f64) -> TargetPrice {
    let Some(yesterday) = candles.len().checked_sub(2).map(|i| candles[i]) else {
        return TargetPrice::UNAVAILABLE;
    };
    target_from_candle(&yesterday, k)
}

/// Band around `yesterday.close` of width `(high - low) * k` on each side
pub fn target_from_candle(yesterday: &DailyCandle, k: f64) -> TargetPrice {
    let values = [yesterday.high, yesterday.low, yesterday.close, k];
    if values.iter().any(|v| !v.is_finite()) || k < 0.0 {
        return TargetPrice::UNAVAILABLE;
    }

    let range = yesterday.high - yesterday.low;
    if range < 0.0 {
        return TargetPrice::UNAVAILABLE;
    }

    let today_open = yesterday.close;
    TargetPrice {
        today_open,
        long: today_open + range * k,
        short: today_open - range * k,
    }
}

/// Prior-day trading value used for volume weighting, 0 when unavailable
pub fn prior_day_trading_value(candles: &[DailyCandle]) -> f64 {
    candles
        .len()
        .checked_sub(2)
        .map(|i| candles[i].trading_value())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(0.0)
}
