//! Case classification and per-case order plans
//!
//! Zones, as fractions of the swing range above the Low:
//!
//! ```text
//! case 1: [58%, 68%)     SELL LIMIT at 68%
//! case 3: [68%, 78.6%)   SELL LIMIT at 78.6%
//! case 4: [78.6%, 90%)   SELL MARKET
//! ```
//!
//! Boundaries come from [`ZoneConfig`]; the numbers above are the defaults.

use serde::{Deserialize, Serialize};

use crate::config::{FibonacciConfig, ZoneConfig};
use crate::swing::Swing;
use crate::{Candle, Case, OrderKind, Side};

#[derive(Debug, Clone)]
pub struct Classifier {
    zones: ZoneConfig,
    recent_candles: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&FibonacciConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &FibonacciConfig) -> Self {
        Classifier {
            zones: config.zones,
            recent_candles: config.recent_candles,
        }
    }

    /// Raw zone for `price`, before any invalidation rule
    pub fn zone(&self, price: f64, swing: &Swing) -> Case {
        if price >= swing.level(self.zones.invalidation) {
            Case::None
        } else if price >= swing.level(self.zones.case4_min) {
            Case::Four
        } else if price >= swing.level(self.zones.case3_min) {
            Case::Three
        } else if price >= swing.level(self.zones.case1_min) {
            Case::One
        } else {
            Case::None
        }
    }

    /// Tradable case for `price`. Only the last `recent_candles` entries of
    /// `candles` are inspected for wicks through a limit entry.
    pub fn classify(&self, price: f64, swing: &Swing, candles: &[Candle]) -> Case {
        let case = self.zone(price, swing);
        if case < swing.min_valid_case {
            return Case::None;
        }

        if let Some(entry) = self.zones.entry_fraction(case) {
            let entry_price = swing.level(entry);
            let tail = &candles[candles.len().saturating_sub(self.recent_candles)..];
            if tail.iter().any(|c| c.high >= entry_price) {
                return Case::None;
            }
        }

        case
    }
}

/// What to place for a classified case
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub case: Case,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price, or the reference price for a market order
    pub price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub swing_high: f64,
    pub swing_low: f64,
}

/// Entry, TP and SL for `case`. Returns `None` for `Case::None`.
pub fn plan_order(
    case: Case,
    swing: &Swing,
    current_price: f64,
    config: &FibonacciConfig,
) -> Option<OrderPlan> {
    let params = config.case_params(case)?;
    let (kind, price) = match config.zones.entry_fraction(case) {
        Some(entry) => (OrderKind::Limit, swing.level(entry)),
        None => (OrderKind::Market, current_price),
    };

    Some(OrderPlan {
        case,
        side: Side::Short,
        kind,
        price,
        take_profit: swing.level(params.take_profit),
        stop_loss: swing.level(params.stop_loss),
        swing_high: swing.high.price,
        swing_low: swing.low.price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swing::{SwingPath, LEVELS};
    use crate::zigzag::{Pivot, PivotKind};
    use chrono::{TimeZone, Utc};

    fn swing(high: f64, low: f64, min_valid_case: Case) -> Swing {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Swing {
            high: Pivot {
                index: 0,
                time: t,
                price: high,
                kind: PivotKind::High,
            },
            low: Pivot {
                index: 5,
                time: t,
                price: low,
                kind: PivotKind::Low,
            },
            levels: LEVELS
                .iter()
                .map(|(n, f)| (n.to_string(), low + (high - low) * f))
                .collect(),
            min_valid_case,
            path: SwingPath::Direct,
        }
    }

    fn wick(high: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Candle::new_unchecked(t, high - 1.0, high, high - 2.0, high - 1.0, 1.0)
    }

    #[test]
    fn test_zone_scenario_by_retracement() {
        let s = swing(100.0, 50.0, Case::One);
        let c = Classifier::default();
        assert_eq!(c.classify(s.level(0.79), &s, &[]), Case::Four);
        assert_eq!(c.classify(s.level(0.70), &s, &[]), Case::Three);
        assert_eq!(c.classify(s.level(0.60), &s, &[]), Case::One);
        assert_eq!(c.classify(s.level(0.95), &s, &[]), Case::None);
    }

    #[test]
    fn test_zone_scenario_zero_based_range() {
        let s = swing(100.0, 0.0, Case::One);
        let c = Classifier::default();
        assert_eq!(c.classify(79.0, &s, &[]), Case::Four);
        assert_eq!(c.classify(70.0, &s, &[]), Case::Three);
        assert_eq!(c.classify(60.0, &s, &[]), Case::One);
        assert_eq!(c.classify(95.0, &s, &[]), Case::None);
        assert_eq!(c.classify(40.0, &s, &[]), Case::None);
    }

    #[test]
    fn test_min_valid_case_downgrades() {
        let s = swing(100.0, 0.0, Case::Three);
        let c = Classifier::default();
        assert_eq!(c.classify(60.0, &s, &[]), Case::None);
        assert_eq!(c.classify(70.0, &s, &[]), Case::Three);
    }

    #[test]
    fn test_recent_wick_through_entry_downgrades() {
        let s = swing(100.0, 0.0, Case::One);
        let c = Classifier::default();

        // Case 1 enters at 68; a recent wick to 69 already traded it.
        let recent = vec![wick(62.0), wick(69.0), wick(63.0)];
        assert_eq!(c.classify(63.0, &s, &recent), Case::None);

        // Older wicks are outside the inspected window.
        let older = vec![wick(69.0), wick(62.0), wick(63.0), wick(63.5)];
        assert_eq!(c.classify(63.0, &s, &older), Case::One);

        // Case 4 is a market entry and ignores wicks.
        let recent = vec![wick(85.0), wick(89.0)];
        assert_eq!(c.classify(85.0, &s, &recent), Case::Four);
    }

    #[test]
    fn test_classification_is_monotonic() {
        let c = Classifier::default();
        for min_case in [Case::One, Case::Three, Case::Four] {
            let s = swing(100.0, 50.0, min_case);
            let recent = vec![wick(83.0), wick(86.0)];
            let mut previous = Case::None;
            for step in 0..=320 {
                let price = s.level(0.58 + step as f64 * 0.001);
                if price >= s.level(0.90) {
                    break;
                }
                let case = c.classify(price, &s, &recent);
                assert!(case >= previous, "{} -> {} at {}", previous, case, price);
                assert_eq!(case, c.classify(price, &s, &recent));
                previous = case;
            }
        }
    }

    #[test]
    fn test_plan_order_per_case() {
        let s = swing(100.0, 0.0, Case::One);
        let config = FibonacciConfig::default();

        let plan = plan_order(Case::One, &s, 60.0, &config).unwrap();
        assert_eq!(plan.kind, OrderKind::Limit);
        assert_eq!(plan.side, Side::Short);
        assert!((plan.price - 68.0).abs() < 1e-9);
        assert!((plan.take_profit - 55.0).abs() < 1e-9);
        assert!((plan.stop_loss - 90.0).abs() < 1e-9);

        let plan = plan_order(Case::Three, &s, 70.0, &config).unwrap();
        assert!((plan.price - 78.6).abs() < 1e-9);
        assert!((plan.stop_loss - 105.0).abs() < 1e-9);

        let plan = plan_order(Case::Four, &s, 81.0, &config).unwrap();
        assert_eq!(plan.kind, OrderKind::Market);
        assert_eq!(plan.price, 81.0);
        assert!((plan.take_profit - 62.0).abs() < 1e-9);

        assert!(plan_order(Case::None, &s, 81.0, &config).is_none());
    }
}
