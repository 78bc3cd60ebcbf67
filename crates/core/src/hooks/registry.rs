//! Hook registry
//!
//! Concurrency-safe storage for hook records and shadow table
//! allocations. No patching logic lives here; the manager drives all
//! memory mutation and uses the registry purely for bookkeeping.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use parking_lot::{Mutex, MutexGuard};

/// Opaque identity of a patched object.
///
/// The wrapped address is never dereferenced outside
/// [`raw`](super::raw); the newtype keeps it from being mixed with
/// unrelated integers or used for arithmetic.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetAddress(usize);

impl TargetAddress {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for TargetAddress {
    fn from(address: usize) -> Self {
        Self(address)
    }
}

impl fmt::Debug for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetAddress({:#x})", self.0)
    }
}

/// Patch strategy for a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Overwrite one slot of the live vtable in place.
    InPlaceSlot,
    /// Redirect the object's vtable pointer at a patched copy of the
    /// first `table_len` slots. The original table is never touched.
    ShadowTable { table_len: usize },
}

/// One active hook.
#[derive(Debug, Clone)]
pub struct HookRecord {
    pub target: TargetAddress,
    pub index: usize,
    pub kind: HookKind,
    /// Function pointer displaced by the hook; needed for pass-through
    /// calls and restoration.
    pub original: *const (),
    /// Caller-supplied redirect target.
    pub replacement: *const (),
}

// SAFETY: records only carry addresses as data; nothing dereferences
// them without going through the raw boundary.
unsafe impl Send for HookRecord {}

/// Owned copy of a vtable with one slot rewritten.
///
/// A hooked object's vtable pointer refers directly into this
/// allocation, so it must stay alive until full teardown.
pub struct ShadowVTable {
    slots: Box<[*const ()]>,
}

// SAFETY: the slots are opaque addresses; the allocation is only ever
// mutated before the object is redirected at it.
unsafe impl Send for ShadowVTable {}

impl ShadowVTable {
    /// Copy `table_len` slots out of the table at `table`.
    ///
    /// # Safety
    /// `table` must point at a readable array of at least `table_len`
    /// function pointers.
    pub unsafe fn copy_from(table: *const *const (), table_len: usize) -> Self {
        let mut slots = vec![std::ptr::null::<()>(); table_len].into_boxed_slice();
        std::ptr::copy_nonoverlapping(table, slots.as_mut_ptr(), table_len);
        Self { slots }
    }

    /// Rewrite one slot of the copy.
    pub fn patch(&mut self, index: usize, replacement: *const ()) {
        self.slots[index] = replacement;
    }

    pub fn slot(&self, index: usize) -> *const () {
        self.slots[index]
    }

    /// Base of the slot array; what the object's vtable pointer is
    /// redirected to.
    pub fn as_ptr(&self) -> *const *const () {
        self.slots.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Derive the composite lookup key for (target, index).
///
/// Order-sensitive, non-cryptographic mix. Distinct pairs only collide
/// once indexes reach 2^32, far past any realistic vtable.
pub fn hook_key(target: TargetAddress, index: usize) -> u64 {
    target.get() as u64 ^ ((index as u64) << 32)
}

/// Registry tables; only reachable through the registry lock.
#[derive(Default)]
pub struct RegistryInner {
    records: HashMap<u64, HookRecord>,
    shadow_tables: Vec<ShadowVTable>,
}

impl RegistryInner {
    /// Insert if absent. Returns false when the key is occupied; the
    /// existing record is never overwritten silently.
    pub fn put(&mut self, key: u64, record: HookRecord) -> bool {
        match self.records.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn get(&self, key: u64) -> Option<&HookRecord> {
        self.records.get(&key)
    }

    /// Delete a record. Does not release any shadow allocation.
    pub fn remove(&mut self, key: u64) -> Option<HookRecord> {
        self.records.remove(&key)
    }

    /// Take ownership of a shadow allocation until teardown.
    pub fn retain_shadow(&mut self, table: ShadowVTable) {
        self.shadow_tables.push(table);
    }

    /// Release every shadow allocation and clear all records.
    /// Idempotent; safe on an empty registry.
    pub fn teardown(&mut self) {
        self.shadow_tables.clear();
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn shadow_count(&self) -> usize {
        self.shadow_tables.len()
    }
}

/// Thread-safe hook storage.
///
/// One internal lock covers both tables; no operation takes a second
/// lock, so there is no deadlock potential inside the registry.
#[derive(Default)]
pub struct HookRegistry {
    inner: Mutex<RegistryInner>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock across a compound sequence (lookup + patch +
    /// record) so it executes as one critical section.
    pub fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock()
    }

    pub fn put(&self, key: u64, record: HookRecord) -> bool {
        self.inner.lock().put(key, record)
    }

    pub fn get(&self, key: u64) -> Option<HookRecord> {
        self.inner.lock().get(key).cloned()
    }

    pub fn remove(&self, key: u64) -> Option<HookRecord> {
        self.inner.lock().remove(key)
    }

    pub fn teardown(&self) {
        self.inner.lock().teardown();
    }

    /// Number of active hook records.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}
