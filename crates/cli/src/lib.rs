//! devbridge command-line interface.
//!
//! Wires the [`devbridge`] orchestrator to real devices, loads configuration,
//! prints the structured result envelope and hosts the cleanup watchdog daemon.

pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod output;
