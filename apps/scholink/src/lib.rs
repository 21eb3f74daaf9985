//! # scholink
//!
//! Command-line front end for the scholink broker. The binary in `main.rs`
//! is a thin wrapper; commands and configuration live here so they can be
//! tested directly.

pub mod cli;
pub mod config;
