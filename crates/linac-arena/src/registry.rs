//! External-value registries and the debug root list.
//!
//! Registries record values that live outside arena memory but are
//! referenced from it. Each record owns a keep-alive (usually an `Arc`
//! clone), so the value cannot be freed before the arena is reset. The
//! checker consults the registries to tell legitimate external references
//! from dangling ones.

#![allow(unsafe_code)]

use std::any::TypeId;

use tracing::warn;

use crate::check::{Checker, ScanFn};
use crate::error::CheckError;

/// Anything an arena can hold on to until reset.
pub(crate) trait Retained: Send + Sync {}

impl<T: Send + Sync + ?Sized> Retained for T {}

/// Which registry an external value belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalKind {
    /// A single value behind a [`Ptr`](crate::Ptr).
    Pointer,
    /// Backing storage of a [`Slice`](crate::Slice).
    Array,
    /// Bytes of a [`Str`](crate::Str).
    String,
    /// A [`MapCell`](crate::MapCell).
    Map,
    /// A closure behind a [`FnRef`](crate::FnRef).
    Function,
}

struct Entry {
    addr: usize,
    _keep: Box<dyn Retained>,
}

/// One kind of external record, with windowed duplicate suppression.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// Record `addr`, unless it appears among the last `window` entries.
    ///
    /// Returns `false` for a suppressed duplicate; `keep` is then dropped,
    /// which is harmless because the earlier entry retains the same value.
    pub(crate) fn record(&mut self, addr: usize, keep: Box<dyn Retained>, window: usize) -> bool {
        if self.entries.iter().rev().take(window).any(|e| e.addr == addr) {
            return false;
        }
        self.entries.push(Entry { addr, _keep: keep });
        true
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.entries.iter().any(|e| e.addr == addr)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The five external registries of one arena.
#[derive(Default)]
pub(crate) struct Externals {
    pointers: Registry,
    arrays: Registry,
    strings: Registry,
    maps: Registry,
    functions: Registry,
}

impl Externals {
    pub(crate) fn get(&self, kind: ExternalKind) -> &Registry {
        match kind {
            ExternalKind::Pointer => &self.pointers,
            ExternalKind::Array => &self.arrays,
            ExternalKind::String => &self.strings,
            ExternalKind::Map => &self.maps,
            ExternalKind::Function => &self.functions,
        }
    }

    pub(crate) fn get_mut(&mut self, kind: ExternalKind) -> &mut Registry {
        match kind {
            ExternalKind::Pointer => &mut self.pointers,
            ExternalKind::Array => &mut self.arrays,
            ExternalKind::String => &mut self.strings,
            ExternalKind::Map => &mut self.maps,
            ExternalKind::Function => &mut self.functions,
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.pointers.len()
            + self.arrays.len()
            + self.strings.len()
            + self.maps.len()
            + self.functions.len()
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A struct allocated in debug mode, recorded for the reset-time check.
#[derive(Clone, Copy)]
pub(crate) struct Root {
    pub(crate) addr: usize,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) scan: ScanFn,
}

impl Root {
    /// Scan the root.
    ///
    /// # Safety
    ///
    /// The arena generation that recorded this root must still be live.
    pub(crate) unsafe fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        // SAFETY: forwarded from the caller; `scan` was monomorphised for
        // the type stored at `addr`.
        unsafe { (self.scan)(self.addr, cx) }
    }
}

/// Bounded, weakly de-duplicated list of debug roots.
#[derive(Default)]
pub(crate) struct RootList {
    roots: Vec<Root>,
    overflowed: bool,
}

impl RootList {
    pub(crate) fn push(&mut self, root: Root, max: usize, window: usize) {
        if self
            .roots
            .iter()
            .rev()
            .take(window)
            .any(|r| r.addr == root.addr && r.type_id == root.type_id)
        {
            return;
        }
        if self.roots.len() >= max {
            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    max,
                    type_name = root.type_name,
                    "debug root list full; further roots are not checked"
                );
            }
            return;
        }
        self.roots.push(root);
    }

    /// Roots, newest first.
    pub(crate) fn newest_first(&self) -> impl Iterator<Item = &Root> + '_ {
        self.roots.iter().rev()
    }

    pub(crate) fn len(&self) -> usize {
        self.roots.len()
    }

    pub(crate) fn clear(&mut self) {
        self.roots.clear();
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keep() -> Box<dyn Retained> {
        Box::new(Arc::new(0_u8))
    }

    unsafe fn noop_scan(_addr: usize, _cx: &mut Checker<'_>) -> Result<(), CheckError> {
        Ok(())
    }

    fn root(addr: usize) -> Root {
        Root {
            addr,
            type_id: TypeId::of::<u64>(),
            type_name: "u64",
            scan: noop_scan,
        }
    }

    #[test]
    fn registry_suppresses_recent_duplicates() {
        let mut reg = Registry::default();
        assert!(reg.record(0x10, keep(), 4));
        assert!(!reg.record(0x10, keep(), 4));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(0x10));
        assert!(!reg.contains(0x18));
    }

    #[test]
    fn duplicates_outside_window_are_kept() {
        let mut reg = Registry::default();
        reg.record(0x10, keep(), 1);
        reg.record(0x20, keep(), 1);
        assert!(reg.record(0x10, keep(), 1));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn externals_route_by_kind() {
        let mut ext = Externals::default();
        ext.get_mut(ExternalKind::Map).record(0x40, keep(), 16);
        assert!(ext.get(ExternalKind::Map).contains(0x40));
        assert!(!ext.get(ExternalKind::Pointer).contains(0x40));
        assert_eq!(ext.total(), 1);
        ext.clear();
        assert_eq!(ext.total(), 0);
    }

    #[test]
    fn root_list_is_bounded() {
        let mut roots = RootList::default();
        for i in 0..10 {
            roots.push(root(0x100 + i * 8), 4, 16);
        }
        assert_eq!(roots.len(), 4);
        roots.clear();
        assert_eq!(roots.len(), 0);
    }

    #[test]
    fn root_list_iterates_newest_first() {
        let mut roots = RootList::default();
        roots.push(root(0x100), 8, 16);
        roots.push(root(0x200), 8, 16);
        roots.push(root(0x100), 8, 16);
        let order: Vec<usize> = roots.newest_first().map(|r| r.addr).collect();
        assert_eq!(order, vec![0x200, 0x100]);
    }
}
