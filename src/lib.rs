//! Exercise checking pipeline.
//!
//! Evaluates student submissions by running an ordered list of configured
//! checkers (builds, unit tests, verification programs, staged files)
//! inside a fresh sandbox directory per run, and aggregates their results
//! into an acceptance verdict plus displayable logs.

pub mod builder;
pub mod checker;
pub mod classify;
pub mod config;
pub mod environment;
pub mod logs;
pub mod pipeline;
pub mod policy;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
pub mod testing;
