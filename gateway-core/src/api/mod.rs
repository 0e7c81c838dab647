//! HTTP handlers for the agent-facing and admin surface (§6). Each
//! submodule owns one group of routes; [`crate::server::build_router`]
//! wires them onto the shared [`crate::state::AppState`].

pub mod admin;

pub mod agents;
pub mod proxy;
pub mod stream;
pub mod tokens;
