//! Isolation boundary for the script engine.
//!
//! Runs a full [`kiln_core::ScriptEngine`] inside a separate host process
//! (`kiln-hostd`) and talks to it over line-delimited JSON on the child's
//! stdio. Only serializable data crosses the boundary; compiled scripts
//! and coroutines stay on the host side, and unloading the context is how
//! the memory a long-lived engine accumulates gets reclaimed.

pub mod client;
pub mod host;
pub mod protocol;

pub use client::{HookHandle, RemoteConfig, RemoteEngine};
pub use host::RemoteHost;
pub use protocol::{Request, Response};
