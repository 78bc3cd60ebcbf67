//! Hook manager
//!
//! Validates inputs, toggles page protection, installs and removes
//! vtable patches, and answers pass-through lookups. A manager owns its
//! registry; independent instances share no state, which also makes
//! them cheap to stand up in tests.
//!
//! The internal lock serializes bookkeeping only. The protection change
//! plus pointer write is not atomic with respect to other threads
//! executing through the same page; correctness of the write itself
//! relies on aligned pointer-sized stores being atomic on the supported
//! targets (see [`raw::write_ptr`]).

use crate::config::EngineConfig;

use super::raw;
use super::registry::{hook_key, HookKind, HookRecord, HookRegistry, ShadowVTable, TargetAddress};
use super::HookError;

/// Result of a successful `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhookOutcome {
    /// The original pointer is back in the live slot and the record is
    /// gone.
    Restored,
    /// The protection change failed; the slot still holds the
    /// replacement and the record was kept so the caller can retry.
    RestoreFailed,
    /// Shadow hook: the record is gone, but the object keeps
    /// dispatching through the shadow table until teardown.
    ShadowRetired,
}

/// Central patch engine.
///
/// All four public operations take the one registry lock for their full
/// duration, so install/remove/lookup sequences from different threads
/// never interleave mid-operation.
pub struct HookManager {
    registry: HookRegistry,
    config: EngineConfig,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: HookRegistry::new(),
            config,
        }
    }

    fn plausible(&self, address: usize) -> bool {
        raw::is_plausible(address, self.config.min_valid_address)
    }

    /// Install a hook at slot `index` of the object at `target`.
    ///
    /// `target` is the address of an object whose first pointer-sized
    /// field is its vtable pointer. On any failure nothing is recorded
    /// and, except for the documented restore window below, nothing is
    /// patched.
    ///
    /// For [`HookKind::InPlaceSlot`], if restoring page protection
    /// fails after the slot write already landed, the install is
    /// reported failed but the slot keeps the replacement. Accepted
    /// limitation; the window is a single syscall wide.
    ///
    /// # Safety
    /// - the object at `target` must stay valid for the lifetime of the
    ///   hook
    /// - `replacement` must match the displaced function's calling
    ///   convention and signature exactly; pointers are passed through
    ///   opaquely with no checking
    /// - for [`HookKind::ShadowTable`], `table_len` must not exceed the
    ///   real table's length
    pub unsafe fn install(
        &self,
        target: TargetAddress,
        index: usize,
        replacement: *const (),
        kind: HookKind,
    ) -> Result<(), HookError> {
        if replacement.is_null() {
            return Err(HookError::InvalidReplacement);
        }
        if !self.plausible(target.get()) {
            return Err(HookError::InvalidAddress(target.get()));
        }

        let mut registry = self.registry.lock();
        let key = hook_key(target, index);
        if registry.get(key).is_some() {
            return Err(HookError::AlreadyHooked { target, index });
        }

        tracing::debug!(
            "Installing {:?} hook at {:?}[{}] -> {:x}",
            kind,
            target,
            index,
            replacement as usize
        );

        let original = match kind {
            HookKind::InPlaceSlot => self.patch_slot_in_place(target, index, replacement)?,
            HookKind::ShadowTable { table_len } => {
                let (original, shadow) =
                    self.swap_in_shadow_table(target, index, table_len, replacement)?;
                registry.retain_shadow(shadow);
                original
            }
        };

        let inserted = registry.put(
            key,
            HookRecord {
                target,
                index,
                kind,
                original,
                replacement,
            },
        );
        debug_assert!(inserted, "key vacancy checked under the same lock");

        tracing::info!("Installed {:?} hook at {:?}[{}]", kind, target, index);
        Ok(())
    }

    /// Remove the hook at (target, index).
    ///
    /// In-place hooks get their original pointer written back,
    /// best-effort: if the page-protection change fails the record is
    /// kept and [`UnhookOutcome::RestoreFailed`] is returned so the
    /// caller can retry. Shadow hooks only drop their record; the
    /// object's vtable pointer is not redirected back, since that would
    /// race any call already dispatching through the shadow table.
    pub fn remove(
        &self,
        target: TargetAddress,
        index: usize,
    ) -> Result<UnhookOutcome, HookError> {
        let mut registry = self.registry.lock();
        let key = hook_key(target, index);
        let record = registry.get(key).cloned().ok_or(HookError::NotFound)?;

        match record.kind {
            HookKind::ShadowTable { .. } => {
                registry.remove(key);
                tracing::info!(
                    "Retired shadow hook at {:?}[{}]; table stays live until teardown",
                    target,
                    index
                );
                Ok(UnhookOutcome::ShadowRetired)
            }
            HookKind::InPlaceSlot => match unsafe { self.restore_slot(&record) } {
                Ok(()) => {
                    registry.remove(key);
                    tracing::info!("Removed in-place hook at {:?}[{}]", target, index);
                    Ok(UnhookOutcome::Restored)
                }
                Err(HookError::Protection(err)) => {
                    tracing::warn!(
                        "Protection change failed while unhooking {:?}[{}]: {}; record kept",
                        target,
                        index,
                        err
                    );
                    Ok(UnhookOutcome::RestoreFailed)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Displaced original pointer for a live hook.
    ///
    /// Replacement functions use this for manual pass-through: look up
    /// the original, transmute to the real signature, call it.
    pub fn original(&self, target: TargetAddress, index: usize) -> Option<*const ()> {
        self.registry.get(hook_key(target, index)).map(|r| r.original)
    }

    pub fn is_hooked(&self, target: TargetAddress, index: usize) -> bool {
        self.registry.get(hook_key(target, index)).is_some()
    }

    /// Number of live hook records.
    pub fn active_hooks(&self) -> usize {
        self.registry.active()
    }

    /// Release every shadow allocation and clear all records.
    ///
    /// Idempotent. Does not un-redirect any object first: an object
    /// still dispatching through a shadow table becomes invalid once
    /// the allocation is freed, so callers must ensure all hooked
    /// objects are destroyed or re-hooked before calling this.
    pub fn teardown(&self) {
        self.registry.teardown();
        tracing::info!("Hook registry torn down");
    }

    /// In-place strategy: overwrite one slot of the live table and
    /// return the displaced pointer.
    unsafe fn patch_slot_in_place(
        &self,
        target: TargetAddress,
        index: usize,
        replacement: *const (),
    ) -> Result<*const (), HookError> {
        let table = raw::read_ptr(target.get()) as usize;
        if !self.plausible(table) {
            return Err(HookError::VTableInvalid(table));
        }

        let slot_address = table + index * std::mem::size_of::<*const ()>();
        let original = raw::read_ptr(slot_address);

        raw::make_writable(slot_address)?;
        raw::write_ptr(slot_address, replacement);
        self.restore(slot_address)?;

        Ok(original)
    }

    /// Shadow strategy: copy the table, patch the copy, redirect the
    /// object's vtable-pointer field at it. The original table is never
    /// mutated. A restore failure after the redirect landed is logged
    /// and swallowed; unwinding at that point would free a table the
    /// object already dispatches through.
    unsafe fn swap_in_shadow_table(
        &self,
        target: TargetAddress,
        index: usize,
        table_len: usize,
        replacement: *const (),
    ) -> Result<(*const (), ShadowVTable), HookError> {
        let table = raw::read_ptr(target.get()) as usize;
        if !self.plausible(table) {
            return Err(HookError::VTableInvalid(table));
        }
        if index >= table_len {
            return Err(HookError::IndexOutOfRange { index, table_len });
        }

        let mut shadow = ShadowVTable::copy_from(table as *const *const (), table_len);
        let original = shadow.slot(index);
        shadow.patch(index, replacement);

        raw::make_writable(target.get())?;
        raw::write_ptr(target.get(), shadow.as_ptr() as *const ());
        if let Err(err) = self.restore(target.get()) {
            tracing::warn!("Protection restore failed after redirect: {}", err);
        }

        Ok((original, shadow))
    }

    /// Write the original pointer back into the live slot.
    unsafe fn restore_slot(&self, record: &HookRecord) -> Result<(), HookError> {
        let table = raw::read_ptr(record.target.get()) as usize;
        if !self.plausible(table) {
            return Err(HookError::VTableInvalid(table));
        }

        let slot_address = table + record.index * std::mem::size_of::<*const ()>();
        raw::make_writable(slot_address)?;
        raw::write_ptr(slot_address, record.original);
        self.restore(slot_address)
    }

    /// Best-effort page restore honoring `restore_protection`.
    unsafe fn restore(&self, address: usize) -> Result<(), HookError> {
        if self.config.restore_protection {
            raw::restore_protection(address)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    use super::*;

    const TABLE_LEN: usize = 10;

    /// Stable, distinct fake slot contents. Never called.
    fn synthetic(index: usize) -> *const () {
        (0x1000_0000 + index * 0x10) as *const ()
    }

    /// An object and its vtable, each in a dedicated page-aligned
    /// mapping so protection toggles in the engine never hit pages the
    /// allocator owns.
    struct FakeObject {
        object: region::Allocation,
        table: region::Allocation,
    }

    impl FakeObject {
        fn new() -> Self {
            let page = region::page::size();
            let mut table =
                region::alloc(page, region::Protection::READ_WRITE_EXECUTE).unwrap();
            let mut object =
                region::alloc(page, region::Protection::READ_WRITE_EXECUTE).unwrap();

            unsafe {
                let slots = table.as_mut_ptr::<*const ()>();
                for i in 0..TABLE_LEN {
                    slots.add(i).write(synthetic(i));
                }
                object
                    .as_mut_ptr::<*const *const ()>()
                    .write(slots as *const *const ());
            }

            Self { object, table }
        }

        fn address(&self) -> TargetAddress {
            TargetAddress::new(self.object.as_ptr::<u8>() as usize)
        }

        fn table_base(&self) -> usize {
            self.table.as_ptr::<u8>() as usize
        }

        /// Current vtable pointer stored in the object.
        fn vptr(&self) -> usize {
            unsafe { raw::read_ptr(self.address().get()) as usize }
        }

        /// Slot of the original table, regardless of where the object
        /// points now.
        fn original_slot(&self, index: usize) -> *const () {
            unsafe { *self.table.as_ptr::<*const ()>().add(index) }
        }

        fn set_slot(&mut self, index: usize, value: *const ()) {
            unsafe {
                self.table.as_mut_ptr::<*const ()>().add(index).write(value);
            }
        }
    }

    #[test]
    fn test_install_rejects_null_replacement() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();

        let result = unsafe {
            manager.install(
                fixture.address(),
                0,
                std::ptr::null(),
                HookKind::InPlaceSlot,
            )
        };
        assert!(matches!(result, Err(HookError::InvalidReplacement)));
        assert_eq!(manager.active_hooks(), 0);
    }

    #[test]
    fn test_install_rejects_implausible_address() {
        let manager = HookManager::new();

        for address in [0usize, 0x10, 0x1000] {
            let result = unsafe {
                manager.install(
                    TargetAddress::new(address),
                    0,
                    synthetic(0),
                    HookKind::InPlaceSlot,
                )
            };
            assert!(matches!(result, Err(HookError::InvalidAddress(_))));
        }
        assert_eq!(manager.active_hooks(), 0);
    }

    #[test]
    fn test_in_place_install_records_original() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();
        let replacement = 0x4444_0000 as *const ();

        unsafe {
            manager
                .install(fixture.address(), 0, replacement, HookKind::InPlaceSlot)
                .unwrap();
        }

        assert_eq!(manager.original(fixture.address(), 0), Some(synthetic(0)));
        assert_eq!(fixture.original_slot(0), replacement);
        // Other slots are untouched.
        assert_eq!(fixture.original_slot(1), synthetic(1));
        assert!(manager.is_hooked(fixture.address(), 0));
        assert_eq!(manager.active_hooks(), 1);
    }

    #[test]
    fn test_double_install_fails_without_side_effects() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();
        let first = 0x4444_0000 as *const ();
        let second = 0x5555_0000 as *const ();

        unsafe {
            manager
                .install(fixture.address(), 0, first, HookKind::InPlaceSlot)
                .unwrap();

            let result = manager.install(fixture.address(), 0, second, HookKind::InPlaceSlot);
            assert!(matches!(result, Err(HookError::AlreadyHooked { .. })));
        }

        // The first hook is unchanged.
        assert_eq!(manager.original(fixture.address(), 0), Some(synthetic(0)));
        assert_eq!(fixture.original_slot(0), first);
        assert_eq!(manager.active_hooks(), 1);
    }

    #[test]
    fn test_remove_never_installed() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();

        let result = manager.remove(fixture.address(), 5);
        assert!(matches!(result, Err(HookError::NotFound)));
    }

    #[test]
    fn test_in_place_remove_restores_exact_pointer() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();

        unsafe {
            manager
                .install(
                    fixture.address(),
                    3,
                    0x4444_0000 as *const (),
                    HookKind::InPlaceSlot,
                )
                .unwrap();
        }
        assert_eq!(fixture.original_slot(3), 0x4444_0000 as *const ());

        let outcome = manager.remove(fixture.address(), 3).unwrap();
        assert_eq!(outcome, UnhookOutcome::Restored);
        assert_eq!(fixture.original_slot(3), synthetic(3));
        assert_eq!(manager.original(fixture.address(), 3), None);

        // A second remove finds nothing.
        assert!(matches!(
            manager.remove(fixture.address(), 3),
            Err(HookError::NotFound)
        ));
    }

    #[test]
    fn test_shadow_install_copies_and_redirects() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();
        let replacement = 0x4444_0000 as *const ();

        unsafe {
            manager
                .install(
                    fixture.address(),
                    2,
                    replacement,
                    HookKind::ShadowTable {
                        table_len: TABLE_LEN,
                    },
                )
                .unwrap();
        }

        // The object now points at a different table.
        let shadow = fixture.vptr();
        assert_ne!(shadow, fixture.table_base());

        let shadow_slots = shadow as *const *const ();
        unsafe {
            assert_eq!(*shadow_slots.add(2), replacement);
            for i in (0..TABLE_LEN).filter(|&i| i != 2) {
                assert_eq!(*shadow_slots.add(i), synthetic(i));
            }
        }

        // The original table is untouched.
        for i in 0..TABLE_LEN {
            assert_eq!(fixture.original_slot(i), synthetic(i));
        }

        assert_eq!(manager.original(fixture.address(), 2), Some(synthetic(2)));
    }

    #[test]
    fn test_shadow_index_out_of_range() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();

        let result = unsafe {
            manager.install(
                fixture.address(),
                TABLE_LEN,
                0x4444_0000 as *const (),
                HookKind::ShadowTable {
                    table_len: TABLE_LEN,
                },
            )
        };
        assert!(matches!(
            result,
            Err(HookError::IndexOutOfRange { index: 10, table_len: 10 })
        ));
        // Nothing was redirected.
        assert_eq!(fixture.vptr(), fixture.table_base());
        assert_eq!(manager.active_hooks(), 0);
    }

    #[test]
    fn test_shadow_remove_retires_record_only() {
        let fixture = FakeObject::new();
        let manager = HookManager::new();

        unsafe {
            manager
                .install(
                    fixture.address(),
                    1,
                    0x4444_0000 as *const (),
                    HookKind::ShadowTable {
                        table_len: TABLE_LEN,
                    },
                )
                .unwrap();
        }
        let shadow = fixture.vptr();

        let outcome = manager.remove(fixture.address(), 1).unwrap();
        assert_eq!(outcome, UnhookOutcome::ShadowRetired);

        // Record gone, but the object still dispatches through the
        // shadow table.
        assert_eq!(manager.original(fixture.address(), 1), None);
        assert_eq!(fixture.vptr(), shadow);
    }

    #[test]
    fn test_teardown_clears_everything_and_is_idempotent() {
        let in_place = FakeObject::new();
        let shadowed = FakeObject::new();
        let manager = HookManager::new();

        unsafe {
            manager
                .install(
                    in_place.address(),
                    0,
                    0x4444_0000 as *const (),
                    HookKind::InPlaceSlot,
                )
                .unwrap();
            manager
                .install(
                    shadowed.address(),
                    4,
                    0x5555_0000 as *const (),
                    HookKind::ShadowTable {
                        table_len: TABLE_LEN,
                    },
                )
                .unwrap();
        }
        assert_eq!(manager.active_hooks(), 2);

        manager.teardown();
        assert_eq!(manager.active_hooks(), 0);
        assert_eq!(manager.original(in_place.address(), 0), None);
        assert_eq!(manager.original(shadowed.address(), 4), None);

        // Safe to call twice consecutively.
        manager.teardown();
        assert_eq!(manager.active_hooks(), 0);
    }

    // Live-dispatch scenario: slot 0 holds a real function, the
    // replacement chains through to it via the manager.

    static MANAGER: OnceLock<HookManager> = OnceLock::new();
    static HOOKED_TARGET: AtomicUsize = AtomicUsize::new(0);
    static REPLACEMENT_HITS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn base_impl(x: usize) -> usize {
        x + 1
    }

    extern "C" fn doubling_replacement(x: usize) -> usize {
        REPLACEMENT_HITS.fetch_add(1, Ordering::SeqCst);

        let manager = MANAGER.get().expect("manager initialized");
        let target = TargetAddress::new(HOOKED_TARGET.load(Ordering::SeqCst));
        let original = manager.original(target, 0).expect("original recorded");
        let original: extern "C" fn(usize) -> usize = unsafe { std::mem::transmute(original) };
        original(x) * 2
    }

    /// Resolve slot `index` through the object's live vtable pointer
    /// and call it, the way a compiled virtual call would.
    unsafe fn virtual_call(target: TargetAddress, index: usize, arg: usize) -> usize {
        let table = raw::read_ptr(target.get()) as *const *const ();
        let f: extern "C" fn(usize) -> usize = std::mem::transmute(*table.add(index));
        f(arg)
    }

    #[test]
    fn test_dispatch_reaches_replacement_and_chains() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut fixture = FakeObject::new();
        fixture.set_slot(0, base_impl as *const ());

        let manager = MANAGER.get_or_init(HookManager::new);
        HOOKED_TARGET.store(fixture.address().get(), Ordering::SeqCst);

        unsafe {
            manager
                .install(
                    fixture.address(),
                    0,
                    doubling_replacement as *const (),
                    HookKind::InPlaceSlot,
                )
                .unwrap();
        }

        // Dispatch reaches the replacement, which chains through.
        assert_eq!(unsafe { virtual_call(fixture.address(), 0, 20) }, 42);
        assert_eq!(REPLACEMENT_HITS.load(Ordering::SeqCst), 1);

        // After removal the slot holds the exact original again.
        assert_eq!(
            manager.remove(fixture.address(), 0).unwrap(),
            UnhookOutcome::Restored
        );
        assert_eq!(unsafe { virtual_call(fixture.address(), 0, 20) }, 21);
        assert_eq!(REPLACEMENT_HITS.load(Ordering::SeqCst), 1);
    }
}
