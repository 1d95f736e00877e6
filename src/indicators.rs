//! Technical indicators powered by the `ta` crate
//!
//! Only what the scanner filters on lives here.

use ta::indicators::RelativeStrengthIndex;
use ta::Next;

/// Relative Strength Index over `values`. Entries before the first full
/// period are `None`.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let rsi_val = indicator.next(value);
            (i + 1 >= period).then_some(rsi_val)
        })
        .collect()
}

/// RSI of the newest value, if there is enough data
pub fn latest_rsi(values: &[f64], period: usize) -> Option<f64> {
    rsi(values, period).last().copied().flatten()
}
