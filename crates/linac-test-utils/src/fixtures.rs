//! Sample arena-storable types.
//!
//! - [`Holder`]: four pointers, the classic checker scenario.
//! - [`Record`]: strings, a growable array and an optional link.
//! - [`Lookup`]: a map and a function reference.
//! - [`Node`]: a singly linked list cell.

use linac_arena::{impl_scan, FnRef, MapRef, Ptr, Slice, Str};

/// Four pointers to integers.
#[derive(Clone, Copy, Debug)]
pub struct Holder {
    pub v: [Ptr<i64>; 4],
}

impl_scan!(Holder { v });

/// A record mixing every handle kind that can point into the arena.
#[derive(Debug)]
pub struct Record {
    pub id: u64,
    pub name: Str,
    pub tags: Slice<Str>,
    pub next: Option<Ptr<Record>>,
}

impl_scan!(Record { id, name, tags, next });

impl Record {
    pub fn new(id: u64, name: Str) -> Self {
        Self {
            id,
            name,
            tags: Slice::empty(),
            next: None,
        }
    }
}

/// External-only handles: a map of pointers and a callback.
#[derive(Clone, Copy, Debug)]
pub struct Lookup {
    pub table: MapRef<u64, Ptr<i64>>,
    pub hook: FnRef<u64, u64>,
}

impl_scan!(Lookup { table, hook });

/// A linked list cell.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub value: i64,
    pub next: Option<Ptr<Node>>,
}

impl_scan!(Node { value, next });
