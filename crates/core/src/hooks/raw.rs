//! Raw memory boundary
//!
//! The only module in the crate that dereferences target addresses or
//! changes page protection. Everything above it operates on validated
//! handles and never touches raw memory directly.

use super::HookError;

/// Plausibility filter for raw addresses.
///
/// Accepts anything non-null and above `floor`. This guards against
/// null-page and small-integer-as-pointer mistakes only - it cannot
/// reject dangling, unmapped, or garbage addresses that happen to be
/// large. A heuristic, not a safety guarantee.
pub fn is_plausible(address: usize, floor: usize) -> bool {
    address != 0 && address > floor
}

/// Read a pointer-sized value at `address`.
///
/// # Safety
/// `address` must be mapped, readable, and pointer-aligned.
pub unsafe fn read_ptr(address: usize) -> *const () {
    std::ptr::read(address as *const *const ())
}

/// Write a pointer-sized value at `address`.
///
/// The store is a single naturally aligned pointer-sized write, which
/// the supported targets perform atomically at the hardware level.
/// Threads dispatching through the slot mid-write observe either the
/// old or the new pointer, never a torn one.
///
/// # Safety
/// `address` must be mapped, writable, and pointer-aligned.
pub unsafe fn write_ptr(address: usize, value: *const ()) {
    std::ptr::write(address as *mut *const (), value);
}

/// Start of the page containing `address`.
pub fn page_start(address: usize) -> usize {
    address & !(region::page::size() - 1)
}

/// Mark the page containing `address` read-write-execute.
///
/// # Safety
/// The page must belong to a live mapping owned by this process.
pub unsafe fn make_writable(address: usize) -> Result<(), HookError> {
    protect_page(address, region::Protection::READ_WRITE_EXECUTE)
}

/// Return the page containing `address` to read-execute.
///
/// # Safety
/// The page must belong to a live mapping owned by this process.
pub unsafe fn restore_protection(address: usize) -> Result<(), HookError> {
    protect_page(address, region::Protection::READ_EXECUTE)
}

unsafe fn protect_page(address: usize, protection: region::Protection) -> Result<(), HookError> {
    let page = page_start(address) as *const u8;
    region::protect(page, region::page::size(), protection)
        .map_err(|e| HookError::Protection(e.to_string()))
}
