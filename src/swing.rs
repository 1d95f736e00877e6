//! Swing finder
//!
//! Walks ZigZag Highs from newest to oldest looking for a High→Low pair whose
//! retracement zone is still tradable for a short entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{FibonacciConfig, ZoneConfig};
use crate::zigzag::{Pivot, PivotKind};
use crate::{Candle, Case};

/// Named retracement levels reported with every swing
pub const LEVELS: &[(&str, f64)] = &[
    ("0", 0.0),
    ("23.6", 0.236),
    ("38.2", 0.382),
    ("50", 0.5),
    ("55", 0.55),
    ("58", 0.58),
    ("61.8", 0.618),
    ("62", 0.62),
    ("68", 0.68),
    ("78.6", 0.786),
    ("90", 0.90),
    ("100", 1.0),
    ("105", 1.05),
];

/// How the finder reached the returned swing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingPath {
    /// The newest High candidate was tradable
    Direct,
    /// Newer Highs were invalidated or not yet actionable
    Fallback { skipped: usize },
}

/// High→Low range defining one trading opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    pub high: Pivot,
    /// True minimum low after the High, not necessarily a ZigZag pivot
    pub low: Pivot,
    pub levels: BTreeMap<String, f64>,
    /// Lowest case still allowed after retracement touches since the Low
    pub min_valid_case: Case,
    pub path: SwingPath,
}

impl Swing {
    pub fn range(&self) -> f64 {
        self.high.price - self.low.price
    }

    /// Price at `fraction` of the range above the Low
    pub fn level(&self, fraction: f64) -> f64 {
        self.low.price + self.range() * fraction
    }

    /// Where `price` sits in the range (0.0 at the Low, 1.0 at the High)
    pub fn fraction_of(&self, price: f64) -> f64 {
        (price - self.low.price) / self.range()
    }
}

/// Retracement level helper for stored swing bounds
pub fn level_between(high: f64, low: f64, fraction: f64) -> f64 {
    low + (high - low) * fraction
}

#[derive(Debug, Clone)]
pub struct SwingFinder {
    zones: ZoneConfig,
    recent_candles: usize,
}

impl Default for SwingFinder {
    fn default() -> Self {
        Self::new(&FibonacciConfig::default())
    }
}

impl SwingFinder {
    pub fn new(config: &FibonacciConfig) -> Self {
        SwingFinder {
            zones: config.zones,
            recent_candles: config.recent_candles,
        }
    }

    /// First tradable swing, newest High first. `None` is a normal outcome.
    pub fn find(&self, pivots: &[Pivot], candles: &[Candle], current_price: f64) -> Option<Swing> {
        if pivots.len() < 2 || candles.len() < 2 {
            return None;
        }

        let pivots = match pivots.last() {
            Some(last) if last.kind == PivotKind::High => &pivots[..pivots.len() - 1],
            _ => pivots,
        };

        let highs = pivots.iter().rev().filter(|p| p.kind == PivotKind::High);
        for (skipped, high) in highs.enumerate() {
            match self.evaluate(high, candles, current_price) {
                Some((low, min_valid_case)) => {
                    let path = if skipped == 0 {
                        SwingPath::Direct
                    } else {
                        SwingPath::Fallback { skipped }
                    };
                    let levels = LEVELS
                        .iter()
                        .map(|(name, f)| {
                            (name.to_string(), level_between(high.price, low.price, *f))
                        })
                        .collect();
                    debug!(
                        high = high.price,
                        low = low.price,
                        min_valid_case = %min_valid_case,
                        ?path,
                        "swing accepted"
                    );
                    return Some(Swing {
                        high: *high,
                        low,
                        levels,
                        min_valid_case,
                        path,
                    });
                }
                None => continue,
            }
        }

        debug!("no tradable swing among {} pivots", pivots.len());
        None
    }

    fn evaluate(&self, high: &Pivot, candles: &[Candle], current_price: f64) -> Option<(Pivot, Case)> {
        let after_high = high.index + 1;
        if after_high >= candles.len() {
            return None;
        }

        let (offset, low_candle) = candles[after_high..]
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.low.total_cmp(&b.1.low))?;
        let low_index = after_high + offset;
        let low = Pivot {
            index: low_index,
            time: low_candle.time,
            price: low_candle.low,
            kind: PivotKind::Low,
        };

        if high.price <= low.price {
            return None;
        }
        let level = |f: f64| level_between(high.price, low.price, f);

        let after_low = &candles[low_index + 1..];
        let invalidation = level(self.zones.invalidation);
        if let Some(c) = after_low.iter().find(|c| c.high >= invalidation) {
            debug!(
                high = high.price,
                touched = c.high,
                level = invalidation,
                "swing invalidated, trying older high"
            );
            return None;
        }

        // Touches inside the most recent candles belong to the classifier.
        let touch_end = candles
            .len()
            .saturating_sub(self.recent_candles)
            .max(low_index + 1);
        let settled = &candles[low_index + 1..touch_end];
        let touched = |f: f64| {
            let lvl = level(f);
            settled.iter().any(|c| c.high >= lvl)
        };

        let min_valid_case = if touched(self.zones.case4_min) {
            Case::Four
        } else if touched(self.zones.case3_min) {
            Case::Three
        } else {
            Case::One
        };

        let floor = self.zones.zone_floor(min_valid_case)?;
        if current_price < level(floor) {
            debug!(
                high = high.price,
                min_valid_case = %min_valid_case,
                "price below actionable zone, trying older high"
            );
            return None;
        }

        Some((low, min_valid_case))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn time(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64)
    }

    fn bar(i: usize, high: f64, low: f64) -> Candle {
        let close = (high + low) / 2.0;
        Candle::new_unchecked(time(i), close, high, low, close, 1.0)
    }

    fn pivot(index: usize, price: f64, kind: PivotKind) -> Pivot {
        Pivot {
            index,
            time: time(index),
            price,
            kind,
        }
    }

    /// High of 100 at index 2, decline to a Low of 50 at index 6, then the
    /// supplied highs for the rebound.
    fn series(rebound_highs: &[f64]) -> (Vec<Candle>, Vec<Pivot>) {
        let mut candles = vec![
            bar(0, 80.0, 75.0),
            bar(1, 90.0, 80.0),
            bar(2, 100.0, 90.0),
            bar(3, 92.0, 80.0),
            bar(4, 82.0, 70.0),
            bar(5, 72.0, 60.0),
            bar(6, 60.0, 50.0),
        ];
        for (k, &h) in rebound_highs.iter().enumerate() {
            candles.push(bar(7 + k, h, h - 2.0));
        }
        let pivots = vec![
            pivot(0, 75.0, PivotKind::Low),
            pivot(2, 100.0, PivotKind::High),
            pivot(6, 50.0, PivotKind::Low),
        ];
        (candles, pivots)
    }

    #[test]
    fn test_untouched_swing_allows_all_cases() {
        let (candles, pivots) = series(&[55.0, 58.0, 60.0, 62.0, 80.0]);
        let swing = SwingFinder::default().find(&pivots, &candles, 79.0).unwrap();

        assert_eq!(swing.high.price, 100.0);
        assert_eq!(swing.low.price, 50.0);
        assert_eq!(swing.low.index, 6);
        assert_eq!(swing.min_valid_case, Case::One);
        assert_eq!(swing.path, SwingPath::Direct);
        assert!((swing.levels["78.6"] - 89.3).abs() < 1e-9);
    }

    #[test]
    fn test_touch_of_68_raises_floor() {
        // 85 is above 84 (68%) but below 89.3 (78.6%), well before the recent window.
        let (candles, pivots) = series(&[60.0, 85.0, 70.0, 66.0, 84.5, 86.0, 87.0]);
        let swing = SwingFinder::default().find(&pivots, &candles, 86.0).unwrap();
        assert_eq!(swing.min_valid_case, Case::Three);
    }

    #[test]
    fn test_recent_touches_do_not_raise_floor() {
        let (candles, pivots) = series(&[60.0, 62.0, 64.0, 85.0, 80.0, 70.0]);
        let swing = SwingFinder::default().find(&pivots, &candles, 82.0).unwrap();
        assert_eq!(swing.min_valid_case, Case::One);
    }

    #[test]
    fn test_price_below_floor_is_not_actionable() {
        let (candles, pivots) = series(&[60.0, 90.0, 70.0, 66.0, 64.0, 65.0]);
        // 78.6% touched, so only case 4 is allowed; 65 is far below 89.3.
        assert!(SwingFinder::default().find(&pivots, &candles, 65.0).is_none());
    }

    #[test]
    fn test_ninety_percent_invalidates_and_falls_back() {
        // Older swing: High 200 at index 0 .. newer High 100 at index 2.
        let mut candles = vec![bar(0, 200.0, 150.0), bar(1, 150.0, 110.0)];
        let (rest, _) = series(&[60.0, 96.0, 80.0, 82.0, 84.0, 85.0]);
        candles.extend(rest.into_iter().skip(2));
        let pivots = vec![
            pivot(0, 200.0, PivotKind::High),
            pivot(2, 100.0, PivotKind::High),
            pivot(6, 50.0, PivotKind::Low),
        ];

        let swing = SwingFinder::default().find(&pivots, &candles, 85.0);
        // 100→50 is dead (96 ≥ 95), 200→50 has 0.9 level at 185; price 85 is
        // below its 58% floor of 137, so nothing is tradable.
        assert!(swing.is_none());

        let swing = SwingFinder::default()
            .find(&pivots, &candles, 140.0)
            .unwrap();
        assert_eq!(swing.high.price, 200.0);
        assert_eq!(swing.path, SwingPath::Fallback { skipped: 1 });
        for c in &candles[swing.low.index + 1..] {
            assert!(c.high < swing.level(0.9));
        }
    }

    #[test]
    fn test_trailing_high_is_dropped() {
        let (candles, mut pivots) = series(&[55.0, 58.0, 60.0, 62.0, 80.0]);
        pivots.push(pivot(11, 80.0, PivotKind::High));
        let swing = SwingFinder::default().find(&pivots, &candles, 79.0).unwrap();
        assert_eq!(swing.high.index, 2);
    }

    #[test]
    fn test_degenerate_inputs() {
        let (candles, pivots) = series(&[55.0]);
        assert!(SwingFinder::default().find(&pivots[..1], &candles, 55.0).is_none());
        assert!(SwingFinder::default().find(&pivots, &candles[..1], 55.0).is_none());
    }
}
