mod tbank;
pub mod token;

pub use tbank::*;

/// Provider tag stored on purchase rows and matched by the reconciler.
pub const PROVIDER_TBANK: &str = "tbank";
