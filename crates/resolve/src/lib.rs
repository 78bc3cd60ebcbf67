//! vhook resolve - Module Address Resolution
//!
//! Maps a (module name, offset) pair to an absolute address in the
//! running process by scanning the process memory map.
//!
//! The hook engine treats a zero address as "not found", so
//! [`absolute_address`] keeps that sentinel contract for callers that
//! just want a number to validate; [`module_base`] reports failures as
//! proper errors.
//!
//! This crate is a collaborator of the hook engine, not a dependency of
//! it: the engine validates whatever address it is handed, wherever it
//! came from.

pub mod error;
pub mod maps;

pub use error::ResolveError;
pub use maps::{absolute_address, module_base, parse_maps};
