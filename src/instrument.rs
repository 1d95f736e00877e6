//! Per-symbol exchange precision
//!
//! Tick size, quantity step and minimum notional are exchange-supplied and
//! injected per symbol. Rounding runs in `Decimal` so a quantity of exactly
//! `10` never turns into `9.999`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub tick_size: Decimal,
    pub qty_step: Decimal,
    pub min_notional: Decimal,
}

impl Default for Instrument {
    /// Fine-grained precision for symbols without exchange metadata
    fn default() -> Self {
        Instrument {
            tick_size: Decimal::new(1, 8),
            qty_step: Decimal::new(1, 6),
            min_notional: Decimal::ZERO,
        }
    }
}

impl Instrument {
    pub fn new(tick_size: Decimal, qty_step: Decimal, min_notional: Decimal) -> Self {
        Instrument {
            tick_size,
            qty_step,
            min_notional,
        }
    }

    /// Nearest multiple of the tick size
    pub fn round_price(&self, price: f64) -> f64 {
        let Ok(value) = Decimal::try_from(price) else {
            return price;
        };
        if self.tick_size.is_zero() {
            return price;
        }
        value
            .checked_div(self.tick_size)
            .and_then(|ticks| ticks.round().checked_mul(self.tick_size))
            .and_then(|rounded| rounded.to_f64())
            .unwrap_or(price)
    }

    /// Floors to the quantity step; never rounds up into more exposure
    pub fn round_qty(&self, quantity: f64) -> f64 {
        let Ok(value) = Decimal::try_from(quantity) else {
            return 0.0;
        };
        if self.qty_step.is_zero() {
            return quantity;
        }
        value
            .checked_div(self.qty_step)
            .and_then(|steps| steps.floor().checked_mul(self.qty_step))
            .and_then(|floored| floored.to_f64())
            .unwrap_or(0.0)
    }

    /// Quantity for a margin at leverage, or `None` when it rounds to zero
    /// or falls below the minimum notional
    pub fn quantity_for(&self, margin: f64, leverage: f64, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }
        let quantity = self.round_qty(margin * leverage / price);
        if quantity <= 0.0 || !self.meets_min_notional(quantity, price) {
            return None;
        }
        Some(quantity)
    }

    pub fn meets_min_notional(&self, quantity: f64, price: f64) -> bool {
        let notional = Decimal::try_from(quantity * price).unwrap_or(Decimal::ZERO);
        notional >= self.min_notional
    }

    /// Decimal places implied by the tick size, for exchange payloads
    pub fn price_precision(&self) -> u32 {
        self.tick_size.normalize().scale()
    }

    pub fn qty_precision(&self) -> u32 {
        self.qty_step.normalize().scale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Instrument {
        Instrument::new(dec!(0.1), dec!(0.001), dec!(5))
    }

    #[test]
    fn test_qty_floors_to_step() {
        assert_eq!(btc().round_qty(0.0129), 0.012);
        assert_eq!(btc().round_qty(10.0), 10.0);
        assert_eq!(Instrument::new(dec!(0.01), dec!(1), dec!(0)).round_qty(7.99), 7.0);
    }

    #[test]
    fn test_price_rounds_to_tick() {
        assert_eq!(btc().round_price(43251.27), 43251.3);
        assert_eq!(Instrument::default().round_price(68.0), 68.0);
    }

    #[test]
    fn test_rounding_out_of_decimal_range() {
        // 7e28 fits a Decimal but 7e28 / 1e-6 does not
        let inst = Instrument::default();
        assert_eq!(inst.round_price(7e28), 7e28);
        assert_eq!(inst.round_qty(7e28), 0.0);
        assert_eq!(inst.quantity_for(7e28, 10.0, 1.0), None);
    }

    #[test]
    fn test_quantity_for_margin() {
        let inst = Instrument::default();
        assert_eq!(inst.quantity_for(68.0, 10.0, 68.0), Some(10.0));
        assert_eq!(inst.quantity_for(3.0, 10.0, 0.0), None);
    }

    #[test]
    fn test_quantity_rejected_at_precision() {
        // 3 USDT * 10x at 60k buys 0.0005 BTC, which floors to zero.
        assert_eq!(btc().quantity_for(3.0, 10.0, 60_000.0), None);
        // Rounds to a non-zero quantity but stays under the 5 USDT notional.
        let inst = Instrument::new(dec!(0.01), dec!(0.1), dec!(5));
        assert_eq!(inst.quantity_for(0.04, 10.0, 2.0), None);
    }

    #[test]
    fn test_precision_digits() {
        assert_eq!(btc().price_precision(), 1);
        assert_eq!(btc().qty_precision(), 3);
        assert_eq!(Instrument::new(dec!(0.0100), dec!(1), dec!(0)).price_precision(), 2);
    }
}
