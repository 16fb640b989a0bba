//! # Hexfall Tools
//!
//! Development-time utilities for the data-driven unit engine. Currently
//! a validator for era and terrain RON files.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod validate;
