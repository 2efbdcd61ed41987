//! CLI module for cadence - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the scheduler,
//! forcing an action and inspecting call records.

pub mod commands;

pub use commands::Cli;
