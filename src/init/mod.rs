// SPDX-License-Identifier: Apache-2.0

//! Wiring for the `logharvest` binary: CLI arguments, the offset registry,
//! a stdout spooler and the agent that runs harvesters over a fixed set of paths.

pub mod agent;
pub mod args;
pub mod registry;
pub mod spooler;
pub mod wait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
