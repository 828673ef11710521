//! Shared flowmesh identifiers, step specs, event types, progress events,
//! operation outcomes, and the step runtime contract.
//!
//! This crate has no cluster or storage dependencies and is safe to use from
//! every layer of the workspace.

#![warn(clippy::pedantic)]

pub mod contract;
pub mod event_type;
pub mod ids;
pub mod outcome;
pub mod progress;
pub mod step;
