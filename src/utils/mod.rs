//! # Utility Functions and Types
//!
//! Time-base arithmetic shared by every timing decision in the crate:
//!
//! - Rational time bases and rates
//! - Rescaling between time bases with explicit rounding
//! - Cross-time-base comparison
//!
//! ```rust
//! use avtranscode::utils::{rescale_q, Rational, TIME_BASE_Q};
//!
//! let tb = Rational::new(1, 90000);
//! assert_eq!(rescale_q(45000, tb, TIME_BASE_Q), 500_000);
//! ```

/// Rational numbers and timestamp rescaling
pub mod rational;

pub use rational::*;
