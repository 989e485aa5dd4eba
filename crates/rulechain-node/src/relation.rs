//! Well-known relation names.
//!
//! Any string is a valid relation; these are the ones the engine and the
//! built-in nodes emit.

pub const SUCCESS: &str = "Success";
pub const FAILURE: &str = "Failure";
pub const TRUE: &str = "True";
pub const FALSE: &str = "False";
