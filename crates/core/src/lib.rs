//! vhook - Runtime vtable patch engine
//!
//! This crate patches virtual dispatch tables inside the running
//! process, redirecting calls to user-supplied replacements while
//! keeping the displaced originals available for pass-through.
//!
//! # Architecture
//!
//! - [`hooks::registry`] - thread-safe bookkeeping for hook records and
//!   shadow table allocations
//! - [`hooks::manager`] - the operational surface: install, remove,
//!   pass-through lookup, teardown
//! - [`hooks::raw`] - the one module allowed to dereference target
//!   addresses or change page protection
//! - [`config`] - TOML-backed engine settings
//!
//! # Thread Safety
//!
//! A [`HookManager`] may be shared freely between threads; all
//! bookkeeping runs under a single internal lock. The patched memory
//! itself is a process-wide resource - see the manager docs for what
//! that does and does not guarantee.

pub mod config;
pub mod hooks;

pub use config::{ConfigError, EngineConfig};
pub use hooks::{
    HookError, HookKind, HookManager, HookRecord, HookRegistry, TargetAddress, UnhookOutcome,
};
