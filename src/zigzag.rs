//! ZigZag pivot detection
//!
//! Reduces a candle series to a strictly alternating sequence of High/Low
//! pivots. A candle is a raw High candidate when its high is the maximum of a
//! window of radius `depth` around it; Lows are symmetric. Equal extremes inside
//! one window resolve to the earliest candle, so a flat top still yields a
//! pivot. The last `depth` candles have no full window to their right and are
//! tested against the candles before them only, so the swing in progress is
//! not lost while it waits for confirmation.
//!
//! Raw candidates are then merged: consecutive candidates of the same kind fold
//! into the most extreme one, and a switch of kind is accepted only when price
//! moved at least `deviation` percent away from the last accepted pivot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Candle;

/// Pivot direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

impl PivotKind {
    fn opposite(self) -> Self {
        match self {
            PivotKind::High => PivotKind::Low,
            PivotKind::Low => PivotKind::High,
        }
    }
}

/// Local price extremum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    /// Index into the candle slice the pivot was computed from
    pub index: usize,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub kind: PivotKind,
}

/// ZigZag sensitivity for one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZigZagParams {
    /// Minimum reversal, in percent of the last pivot price
    pub deviation: f64,
    /// Window radius in candles
    pub depth: usize,
}

impl Default for ZigZagParams {
    fn default() -> Self {
        ZigZagParams {
            deviation: 2.0,
            depth: 8,
        }
    }
}

impl ZigZagParams {
    pub fn new(deviation: f64, depth: usize) -> Self {
        ZigZagParams { deviation, depth }
    }

    /// Built-in parameters for a timeframe, falling back to the 1h setting
    pub fn for_timeframe(timeframe: &str) -> Self {
        default_table()
            .get(timeframe)
            .copied()
            .unwrap_or_default()
    }
}

/// Per-timeframe defaults, overridable from the `zigzag` config section
pub fn default_table() -> BTreeMap<String, ZigZagParams> {
    [
        ("1m", 0.3, 5),
        ("5m", 0.5, 5),
        ("15m", 1.0, 5),
        ("1h", 2.0, 8),
        ("2h", 2.5, 9),
        ("4h", 3.0, 10),
        ("1d", 5.0, 10),
    ]
    .into_iter()
    .map(|(tf, deviation, depth)| (tf.to_string(), ZigZagParams::new(deviation, depth)))
    .collect()
}

/// Detect alternating pivots. Returns an empty vector for fewer than
/// `2 * depth` candles.
pub fn detect(candles: &[Candle], params: &ZigZagParams) -> Vec<Pivot> {
    let depth = params.depth;
    if depth == 0 || candles.len() < depth * 2 {
        return Vec::new();
    }

    let threshold = params.deviation / 100.0;
    let mut pivots: Vec<Pivot> = Vec::new();

    for index in 0..candles.len() {
        let is_high = is_window_extreme(candles, index, depth, PivotKind::High);
        let is_low = is_window_extreme(candles, index, depth, PivotKind::Low);

        // An outside bar can qualify both ways; keep the side that continues
        // the alternation.
        let kind = match (is_high, is_low) {
            (true, true) => pivots
                .last()
                .map(|p| p.kind.opposite())
                .unwrap_or(PivotKind::High),
            (true, false) => PivotKind::High,
            (false, true) => PivotKind::Low,
            (false, false) => continue,
        };

        let candle = &candles[index];
        let candidate = Pivot {
            index,
            time: candle.time,
            price: match kind {
                PivotKind::High => candle.high,
                PivotKind::Low => candle.low,
            },
            kind,
        };

        merge_candidate(&mut pivots, candidate, threshold);
    }

    pivots
}

fn merge_candidate(pivots: &mut Vec<Pivot>, candidate: Pivot, threshold: f64) {
    let Some(last) = pivots.last_mut() else {
        pivots.push(candidate);
        return;
    };

    if last.kind == candidate.kind {
        let more_extreme = match candidate.kind {
            PivotKind::High => candidate.price > last.price,
            PivotKind::Low => candidate.price < last.price,
        };
        if more_extreme {
            *last = candidate;
        }
        return;
    }

    let reversed = match candidate.kind {
        PivotKind::Low => candidate.price <= last.price * (1.0 - threshold),
        PivotKind::High => candidate.price >= last.price * (1.0 + threshold),
    };
    if reversed {
        pivots.push(candidate);
    }
    // A shallow counter-move only confirms the previous pivot.
}

fn is_window_extreme(candles: &[Candle], index: usize, depth: usize, kind: PivotKind) -> bool {
    let start = index.saturating_sub(depth);
    let trailing = index + depth >= candles.len();
    let value = |c: &Candle| match kind {
        PivotKind::High => c.high,
        PivotKind::Low => c.low,
    };
    let beats = |candidate: f64, other: f64, strict: bool| match (kind, strict) {
        (PivotKind::High, true) => candidate > other,
        (PivotKind::High, false) => candidate >= other,
        (PivotKind::Low, true) => candidate < other,
        (PivotKind::Low, false) => candidate <= other,
    };

    let price = value(&candles[index]);
    let left_ok = candles[start..index]
        .iter()
        .all(|c| beats(price, value(c), true));
    if trailing {
        return left_ok;
    }
    let right_ok = candles[index + 1..=index + depth]
        .iter()
        .all(|c| beats(price, value(c), false));

    left_ok && right_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candle(i: usize, high: f64, low: f64) -> Candle {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
        let mid = (high + low) / 2.0;
        Candle::new_unchecked(time, mid, high, low, mid, 100.0)
    }

    /// Linear legs between the given turning points, one candle per step
    fn legs(points: &[f64], steps: usize) -> Vec<Candle> {
        let mut mids = Vec::new();
        for pair in points.windows(2) {
            for s in 0..steps {
                mids.push(pair[0] + (pair[1] - pair[0]) * s as f64 / steps as f64);
            }
        }
        mids.push(*points.last().unwrap());
        mids.iter()
            .enumerate()
            .map(|(i, &m)| candle(i, m * 1.002, m * 0.998))
            .collect()
    }

    fn assert_alternates(pivots: &[Pivot]) {
        for pair in pivots.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind, "pivots must alternate: {:?}", pivots);
            assert!(pair[0].index < pair[1].index);
        }
    }

    #[test]
    fn test_too_few_candles() {
        let candles = legs(&[100.0, 120.0, 100.0], 10);
        let params = ZigZagParams::new(1.0, 5);
        assert!(detect(&candles[..9], &params).is_empty());
        assert!(!detect(&candles, &params).is_empty());
    }

    #[test]
    fn test_detects_clean_swings() {
        let candles = legs(&[100.0, 150.0, 110.0, 160.0, 120.0], 12);
        let pivots = detect(&candles, &ZigZagParams::new(3.0, 5));

        assert_alternates(&pivots);
        let highs: Vec<f64> = pivots
            .iter()
            .filter(|p| p.kind == PivotKind::High)
            .map(|p| p.price)
            .collect();
        assert_eq!(highs.len(), 2);
        assert!((highs[0] - 150.0 * 1.002).abs() < 1e-9);
        assert!((highs[1] - 160.0 * 1.002).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_swing_is_kept() {
        // The final low has no `depth` candles after it.
        let mut candles = legs(&[100.0, 150.0], 12);
        let n = candles.len();
        candles.push(candle(n, 140.0, 120.0));
        candles.push(candle(n + 1, 125.0, 110.0));
        let pivots = detect(&candles, &ZigZagParams::new(3.0, 5));

        let last = pivots.last().unwrap();
        assert_eq!(last.kind, PivotKind::Low);
        assert_eq!(last.index, n + 1);
    }

    #[test]
    fn test_equal_highs_resolve_to_earliest() {
        let mut candles = legs(&[100.0, 150.0], 12);
        let top = candles.len();
        candles.push(candle(top, 151.0, 149.0));
        candles.push(candle(top + 1, 151.0, 148.0));
        for (i, &mid) in [140.0, 130.0, 120.0, 110.0, 105.0, 100.0].iter().enumerate() {
            candles.push(candle(top + 2 + i, mid + 1.0, mid - 1.0));
        }
        let pivots = detect(&candles, &ZigZagParams::new(3.0, 3));

        let high = pivots.iter().find(|p| p.kind == PivotKind::High).unwrap();
        assert_eq!(high.index, top);
        assert_eq!(high.price, 151.0);
    }

    #[test]
    fn test_trailing_candles_look_back_only() {
        // Still rising: the newest candle is the High even with no candles after it.
        let candles = legs(&[150.0, 100.0, 130.0], 10);
        let pivots = detect(&candles, &ZigZagParams::new(3.0, 5));

        let last = pivots.last().unwrap();
        assert_eq!(last.kind, PivotKind::High);
        assert_eq!(last.index, candles.len() - 1);
    }

    #[test]
    fn test_shallow_reversal_is_ignored() {
        // 1% pullback with a 3% threshold never produces a Low.
        let candles = legs(&[100.0, 150.0, 148.5, 160.0], 10);
        let pivots = detect(&candles, &ZigZagParams::new(3.0, 4));
        assert_alternates(&pivots);
        assert!(pivots
            .iter()
            .all(|p| p.kind != PivotKind::Low || p.price < 110.0));
    }

    #[test]
    fn test_alternation_on_noisy_series() {
        let mut state: u64 = 42;
        let mut price = 100.0;
        let mut candles = Vec::new();
        for i in 0..600 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let r = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            price = (price * (1.0 + r * 0.04)).max(1.0);
            let spread = price * 0.01 * (1.0 + r.abs());
            candles.push(candle(i, price + spread, price - spread));
        }

        for params in default_table().values() {
            assert_alternates(&detect(&candles, params));
        }
    }

    #[test]
    fn test_timeframe_lookup_falls_back_to_hourly() {
        assert_eq!(ZigZagParams::for_timeframe("4h"), ZigZagParams::new(3.0, 10));
        assert_eq!(ZigZagParams::for_timeframe("3w"), ZigZagParams::new(2.0, 8));
    }
}
