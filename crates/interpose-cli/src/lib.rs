//! Interpose command-line driver
//!
//! Command implementations live here so they can be exercised from tests;
//! `main.rs` only parses arguments and installs logging.

pub mod commands;
pub mod output;
