//! Hook system
//!
//! Two patch strategies for virtual dispatch tables:
//! - In-place slot hooks (overwrite one entry of the live vtable)
//! - Shadow-table hooks (redirect the object's vtable pointer to a
//!   patched copy, leaving the original table untouched)
//!
//! Bookkeeping lives in [`registry`]; [`manager`] is the operational
//! surface. Every raw dereference and protection change goes through
//! [`raw`].

pub mod manager;
pub mod raw;
pub mod registry;

pub use manager::{HookManager, UnhookOutcome};
pub use registry::{HookKind, HookRecord, HookRegistry, ShadowVTable, TargetAddress};

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Replacement function pointer is null")]
    InvalidReplacement,

    #[error("Implausible target address: {0:#x}")]
    InvalidAddress(usize),

    #[error("VTable pointer failed validation: {0:#x}")]
    VTableInvalid(usize),

    #[error("Slot index {index} out of range for table of {table_len}")]
    IndexOutOfRange { index: usize, table_len: usize },

    #[error("Hook already installed at {target:?}[{index}]")]
    AlreadyHooked { target: TargetAddress, index: usize },

    #[error("Memory protection failed: {0}")]
    Protection(String),

    #[error("Hook not found")]
    NotFound,
}
