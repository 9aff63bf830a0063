//! Alfa server library
//!
//! Configuration loading, startup utilities and the command implementations
//! behind the `alfa-lock` binary.

pub mod command;
pub mod config;
pub mod startup;
