// ============================================================================
// Numeric Module
// Fixed-point arithmetic for prices and quantities
// ============================================================================
//
// - FixedDecimal<D>: i64 scaled by 10^D, integer ordering
// - NumericError: failures of checked arithmetic and parsing
// - Price/Quantity aliases used across the engine

mod errors;
mod fixed_decimal;

pub use errors::{NumericError, NumericResult};
pub use fixed_decimal::{FixedDecimal, Price, Quantity};
