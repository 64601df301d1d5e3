//! # revdb Configuration Module
//!
//! This module centralizes all on-disk layout constants for revdb. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The storage layer's correctness hinges on a handful of byte offsets that
//! must agree between the writer and the reader: the bootstrap slot, the
//! first-beacon offset, and the two alignment moduli. Scattering these across
//! files risks a writer/reader mismatch that only surfaces as corruption at
//! read time. Co-locating them with compile-time checks prevents that.
//!
//! ## Module Organization
//!
//! - [`constants`]: All layout values with dependency documentation

pub mod constants;
pub use constants::*;
