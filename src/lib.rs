//! `pbars` — a local operations harness over the progress-bar telemetry
//! core's seven components (identifiers and clock, schema registry,
//! hot-state adapter, trace intake, sampling policy, predictor engine,
//! subscription fabric).
//!
//! The core itself lives in the `pbars-*` crates this binary depends on;
//! this crate wires them together behind a small CLI for local development,
//! keeping `main.rs` a thin entrypoint over the library.

pub mod cli;
pub mod config;
pub mod logging;
pub mod runtime;

pub use config::Config;
pub use runtime::Runtime;
