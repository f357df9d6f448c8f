//! Debug-mode safety checker.
//!
//! Arena memory is freed wholesale on reset, so a value that escapes into
//! arena memory without being accounted for becomes a dangling reference
//! the moment the arena recycles. The checker walks every debug root
//! (structs allocated while debug mode was on) and classifies each handle
//! it meets:
//!
//! | Target | Verdict |
//! |---|---|
//! | inside one of the arena's chunks | ok, recurse into it |
//! | the arena control block itself | ok |
//! | recorded in the matching external registry | ok |
//! | `'static` data, empty arrays | ok |
//! | anything else, or an earlier epoch of this arena | violation |
//!
//! Types describe their shape through the [`Scan`] trait. Structs get an
//! implementation from [`impl_scan!`](crate::impl_scan), which also records
//! field names so a violation can be reported as e.g. `D.v[2]`.

#![allow(unsafe_code)]

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::chunk::ChunkList;
use crate::error::{CheckError, ViolationKind};
use crate::handle::{ArenaId, FnRef, MapRef, Ptr, Slice, Stamp, Str};
use crate::registry::{ExternalKind, Externals, RootList};

/// How long the checker waits for a write-locked map before reporting it.
const MAP_LOCK_WAIT: Duration = Duration::from_millis(50);

/// Shape category of a scannable type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// No references inside (integers, floats, `bool`, `char`).
    Plain,
    /// A [`Ptr`].
    Pointer,
    /// A [`Slice`].
    Array,
    /// An inline `[T; N]`.
    FixedArray,
    /// A [`MapRef`].
    Map,
    /// A [`Str`].
    Str,
    /// A [`FnRef`].
    Func,
    /// A struct with named fields. Struct values allocated in debug mode
    /// become checker roots.
    Struct,
    /// The arena control block.
    SelfRef,
    /// Something the checker cannot look inside.
    Unsupported,
}

/// Describes how the checker walks a type.
///
/// The default implementation reports the type as unsupported (once per
/// process) and skips it.
pub trait Scan: 'static {
    /// Shape category.
    const KIND: Kind = Kind::Unsupported;

    /// Inspect every handle reachable from `self`.
    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        cx.unsupported(std::any::type_name::<Self>());
        Ok(())
    }
}

/// Monomorphised entry point for one root type.
pub(crate) type ScanFn = unsafe fn(usize, &mut Checker<'_>) -> Result<(), CheckError>;

/// Scan the `T` stored at `addr`.
///
/// # Safety
///
/// `addr` must hold a live, initialised `T`.
pub(crate) unsafe fn scan_root<T: Scan>(addr: usize, cx: &mut Checker<'_>) -> Result<(), CheckError> {
    // SAFETY: forwarded from the caller.
    let value = unsafe { &*(addr as *const T) };
    value.scan(cx)
}

/// What the checker needs to know about the arena under inspection.
pub(crate) struct ArenaView<'a> {
    pub(crate) id: ArenaId,
    pub(crate) epoch: u64,
    pub(crate) self_addr: usize,
    pub(crate) chunks: &'a ChunkList,
    pub(crate) externals: &'a Externals,
}

/// Summary of a completed pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Roots scanned (after de-duplication).
    pub roots: usize,
    /// Arena-internal and registered targets scanned through handles.
    pub nodes: usize,
}

#[derive(Clone, Copy, Debug)]
enum Segment {
    Field(&'static str, &'static str),
    Index(usize),
    MapValue,
}

enum Place {
    Internal,
    SelfRef,
    External,
}

/// Traversal state for one check pass.
pub struct Checker<'a> {
    view: ArenaView<'a>,
    root: &'static str,
    path: SmallVec<[Segment; 8]>,
    visited: HashSet<(usize, TypeId)>,
    nodes: usize,
}

impl<'a> Checker<'a> {
    fn new(view: ArenaView<'a>) -> Self {
        Self {
            view,
            root: "",
            path: SmallVec::new(),
            visited: HashSet::new(),
            nodes: 0,
        }
    }

    /// Scan `value` as field `name` of struct `owner`.
    pub fn field<F: Scan>(
        &mut self,
        owner: &'static str,
        name: &'static str,
        value: &F,
    ) -> Result<(), CheckError> {
        self.path.push(Segment::Field(owner, name));
        let result = value.scan(self);
        self.path.pop();
        result
    }

    /// Scan `value` as element `index` of the enclosing array.
    pub fn index<E: Scan>(&mut self, index: usize, value: &E) -> Result<(), CheckError> {
        self.path.push(Segment::Index(index));
        let result = value.scan(self);
        self.path.pop();
        result
    }

    /// Report a type the checker cannot inspect. Logged once per process.
    pub fn unsupported(&mut self, type_name: &'static str) {
        if reported().lock().insert(type_name) {
            warn!(
                type_name,
                path = %self.render_path(),
                "safety checker cannot inspect this type; skipping it"
            );
        }
    }

    fn render_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                Segment::Field(owner, name) => {
                    if !out.is_empty() {
                        out.push_str(" -> ");
                    }
                    let _ = write!(out, "{owner}.{name}");
                }
                Segment::Index(i) => {
                    let _ = write!(out, "[{i}]");
                }
                Segment::MapValue => out.push_str("[value]"),
            }
        }
        if out.is_empty() {
            out.push_str(self.root);
        }
        out
    }

    fn violation(&self, kind: ViolationKind, addr: usize) -> CheckError {
        CheckError {
            path: self.render_path(),
            kind,
            addr,
        }
    }

    /// First time `(addr, T)` is reached in this pass?
    fn first_visit<T: 'static + ?Sized>(&mut self, addr: usize) -> bool {
        let fresh = self.visited.insert((addr, TypeId::of::<T>()));
        if fresh {
            self.nodes += 1;
        }
        fresh
    }

    fn locate(
        &self,
        stamp: Stamp,
        addr: usize,
        registry: ExternalKind,
        kind: ViolationKind,
    ) -> Result<Place, CheckError> {
        if stamp.arena == self.view.id && stamp.epoch != self.view.epoch {
            return Err(self.violation(ViolationKind::StaleHandle, addr));
        }
        if !stamp.is_unmanaged() && stamp.arena != self.view.id {
            return Err(self.violation(kind, addr));
        }
        if addr == self.view.self_addr {
            return Ok(Place::SelfRef);
        }
        if self.view.chunks.contains(addr) {
            return Ok(Place::Internal);
        }
        if self.view.externals.get(registry).contains(addr) {
            return Ok(Place::External);
        }
        Err(self.violation(kind, addr))
    }
}

fn reported() -> &'static Mutex<HashSet<&'static str>> {
    static REPORTED: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    REPORTED.get_or_init(Default::default)
}

/// Walk every root, newest first, visiting each `(address, type)` once.
pub(crate) fn run(view: ArenaView<'_>, roots: &RootList) -> Result<CheckReport, CheckError> {
    let mut cx = Checker::new(view);
    let mut scanned = 0;
    for root in roots.newest_first() {
        if !cx.visited.insert((root.addr, root.type_id)) {
            continue;
        }
        scanned += 1;
        cx.path.clear();
        cx.root = root.type_name;
        // SAFETY: roots are recorded by the generation being checked, and a
        // check only runs while that generation's chunks are still tracked.
        unsafe { root.scan(&mut cx)? };
    }
    debug!(
        arena = %cx.view.id,
        roots = scanned,
        nodes = cx.nodes,
        "safety check passed"
    );
    Ok(CheckReport {
        roots: scanned,
        nodes: cx.nodes,
    })
}

// ── Scan implementations ────────────────────────────────────────

macro_rules! scan_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scan for $ty {
                const KIND: Kind = Kind::Plain;

                fn scan(&self, _cx: &mut Checker<'_>) -> Result<(), CheckError> {
                    Ok(())
                }
            }
        )*
    };
}

scan_plain!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool, char, ());

impl<T: Scan> Scan for Ptr<T> {
    const KIND: Kind = Kind::Pointer;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        let addr = self.addr();
        match cx.locate(
            self.stamp(),
            addr,
            ExternalKind::Pointer,
            ViolationKind::ExternalPointer,
        )? {
            Place::Internal => {
                if !cx.first_visit::<T>(addr) {
                    return Ok(());
                }
                // SAFETY: the address lies in a chunk of the live generation
                // and the handle carries the current epoch, so it refers to
                // the `T` written when the handle was issued.
                let target = unsafe { self.as_non_null().as_ref() };
                target.scan(cx)
            }
            Place::SelfRef | Place::External => Ok(()),
        }
    }
}

impl<T: Scan> Scan for Slice<T> {
    const KIND: Kind = Kind::Array;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        if self.is_empty() {
            return Ok(());
        }
        let addr = self.addr();
        match cx.locate(
            self.stamp(),
            addr,
            ExternalKind::Array,
            ViolationKind::ExternalArray,
        )? {
            Place::Internal => {
                if !cx.first_visit::<[T]>(addr) {
                    return Ok(());
                }
                // SAFETY: as for `Ptr`; the first `len` elements were
                // initialised when the array was built or grown.
                let items =
                    unsafe { std::slice::from_raw_parts(self.as_non_null().as_ptr(), self.len()) };
                for (i, item) in items.iter().enumerate() {
                    cx.index(i, item)?;
                }
                Ok(())
            }
            Place::SelfRef | Place::External => Ok(()),
        }
    }
}

impl Scan for Str {
    const KIND: Kind = Kind::Str;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        if self.is_empty() || self.stamp() == Stamp::STATIC {
            return Ok(());
        }
        cx.locate(
            self.stamp(),
            self.addr(),
            ExternalKind::String,
            ViolationKind::ExternalString,
        )
        .map(|_| ())
    }
}

impl<K: 'static, V: Scan> Scan for MapRef<K, V> {
    const KIND: Kind = Kind::Map;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        let addr = self.addr();
        cx.locate(self.stamp(), addr, ExternalKind::Map, ViolationKind::ExternalMap)?;
        if !cx.first_visit::<MapRef<K, V>>(addr) {
            return Ok(());
        }
        // SAFETY: the map registry holds an `Arc` to this cell until reset.
        let cell = unsafe { self.as_non_null().as_ref() };
        let Some(map) = cell.try_read_for(MAP_LOCK_WAIT) else {
            return Err(cx.violation(ViolationKind::LockedMap, addr));
        };
        cx.path.push(Segment::MapValue);
        let result = map.values().try_for_each(|value| value.scan(cx));
        cx.path.pop();
        result
    }
}

impl<A: 'static, R: 'static> Scan for FnRef<A, R> {
    const KIND: Kind = Kind::Func;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        cx.locate(
            self.stamp(),
            self.addr(),
            ExternalKind::Function,
            ViolationKind::ExternalFunction,
        )
        .map(|_| ())
    }
}

impl<T: Scan, const N: usize> Scan for [T; N] {
    const KIND: Kind = Kind::FixedArray;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        for (i, item) in self.iter().enumerate() {
            cx.index(i, item)?;
        }
        Ok(())
    }
}

impl<T: Scan> Scan for Option<T> {
    const KIND: Kind = T::KIND;

    fn scan(&self, cx: &mut Checker<'_>) -> Result<(), CheckError> {
        match self {
            Some(value) => value.scan(cx),
            None => Ok(()),
        }
    }
}

impl Scan for Arena {
    const KIND: Kind = Kind::SelfRef;

    fn scan(&self, _cx: &mut Checker<'_>) -> Result<(), CheckError> {
        Ok(())
    }
}

/// Implement [`Scan`] for a struct by listing its fields.
///
/// ```
/// use linac_arena::{impl_scan, Ptr};
///
/// struct Node {
///     value: i64,
///     next: Option<Ptr<Node>>,
/// }
///
/// impl_scan!(Node { value, next });
/// ```
#[macro_export]
macro_rules! impl_scan {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::Scan for $ty {
            const KIND: $crate::Kind = $crate::Kind::Struct;

            fn scan(
                &self,
                cx: &mut $crate::Checker<'_>,
            ) -> ::std::result::Result<(), $crate::CheckError> {
                let _ = &cx;
                $( cx.field(stringify!($ty), stringify!($field), &self.$field)?; )*
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opaque;

    impl Scan for Opaque {}

    #[test]
    fn plain_kinds() {
        assert_eq!(<i64 as Scan>::KIND, Kind::Plain);
        assert_eq!(<Ptr<i64> as Scan>::KIND, Kind::Pointer);
        assert_eq!(<[Ptr<i64>; 4] as Scan>::KIND, Kind::FixedArray);
        assert_eq!(<Option<Str> as Scan>::KIND, Kind::Str);
        assert_eq!(<Opaque as Scan>::KIND, Kind::Unsupported);
    }

    #[test]
    fn unsupported_types_are_reported_once() {
        let chunks = ChunkList::default();
        let externals = Externals::default();
        let mut cx = Checker::new(ArenaView {
            id: ArenaId::next(),
            epoch: 0,
            self_addr: 0,
            chunks: &chunks,
            externals: &externals,
        });
        assert!(Opaque.scan(&mut cx).is_ok());
        assert!(Opaque.scan(&mut cx).is_ok());
        assert!(reported()
            .lock()
            .contains(std::any::type_name::<Opaque>()));
    }

    #[test]
    fn path_renders_fields_and_indices() {
        let chunks = ChunkList::default();
        let externals = Externals::default();
        let mut cx = Checker::new(ArenaView {
            id: ArenaId::next(),
            epoch: 0,
            self_addr: 0,
            chunks: &chunks,
            externals: &externals,
        });
        cx.root = "D";
        assert_eq!(cx.render_path(), "D");
        cx.path.push(Segment::Field("D", "v"));
        cx.path.push(Segment::Index(2));
        cx.path.push(Segment::Field("Inner", "x"));
        assert_eq!(cx.render_path(), "D.v[2] -> Inner.x");
    }

    #[test]
    fn leaked_pointer_is_a_violation() {
        let chunks = ChunkList::default();
        let externals = Externals::default();
        let mut cx = Checker::new(ArenaView {
            id: ArenaId::next(),
            epoch: 0,
            self_addr: 0,
            chunks: &chunks,
            externals: &externals,
        });
        let p = Ptr::leak(Box::new(3_i64));
        let err = cx.field("D", "p", &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::ExternalPointer);
        assert_eq!(err.path, "D.p");
        assert_eq!(err.addr, p.addr());
    }

    #[test]
    fn static_strings_and_empty_arrays_pass() {
        let chunks = ChunkList::default();
        let externals = Externals::default();
        let mut cx = Checker::new(ArenaView {
            id: ArenaId::next(),
            epoch: 0,
            self_addr: 0,
            chunks: &chunks,
            externals: &externals,
        });
        assert!(Str::from_static("hello").scan(&mut cx).is_ok());
        assert!(Slice::<Ptr<i64>>::empty().scan(&mut cx).is_ok());
        let err = Str::leak("owned".to_string()).scan(&mut cx).unwrap_err();
        assert_eq!(err.kind, ViolationKind::ExternalString);
    }
}
