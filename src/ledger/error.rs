//! Ledger error types

use thiserror::Error;

use super::types::OrderId;
use crate::Symbol;

/// Placement and transition failures. None of these leave a partial
/// mutation behind.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient margin: available {available:.4}, required {required:.4}")]
    InsufficientMargin { available: f64, required: f64 },

    #[error("{symbol}: quantity {quantity} at {price} rejected by instrument precision")]
    PrecisionRejected {
        symbol: Symbol,
        quantity: f64,
        price: f64,
    },

    #[error("{0} already has an open position or pending order")]
    SymbolOccupied(Symbol),

    #[error("invalid price {0}")]
    InvalidPrice(f64),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("unknown position {0}")]
    UnknownPosition(OrderId),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
