//! Steppable command contexts.
//!
//! A context is a small state machine driven by `step()`: each state runs
//! to completion and returns a [`Status`](driftkv_types::Status). `step`
//! loops while states succeed, returns `WouldBlock` to park the command
//! (the worker is released and the context re-driven on completion), and
//! propagates any other status to the caller.

mod get;
mod mutation;

pub use get::{GetCommandContext, GetState};
pub use mutation::{MutationCommandContext, MutationState};
