//! Library surface for the `issue-engine` binary, split out so integration
//! tests can drive the real `axum::Router` without spawning a subprocess.

pub mod api;
pub mod bootstrap;
pub mod state;
