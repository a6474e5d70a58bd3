//! Core domain + application logic for QR Mate.
//!
//! This crate is framework-agnostic. The remote API, QR decoding, and the
//! Telegram front end live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod deeplink;
pub mod direct_connect;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod polling;
pub mod policy;
pub mod ports;
pub mod session;
pub mod store;

pub use errors::{Error, Result};
