//! Cell representation
//!
//! Every Scheme value is a cell (or a chain of cells) in the segmented heap.
//! A cell carries a 5-bit type tag, a flag word, and a two-slot payload that
//! the tag reinterprets. The pair-shaped family (pair, symbol, closure,
//! macro, promise, environment) shares the `Kind::Pair` payload and differs
//! only by tag, which is what makes retag-in-place (`macro`, forced
//! promises) work.

use bitflags::bitflags;

use crate::num::Num;
use crate::opcodes::Op;
use crate::port::Port;
use crate::skstring::StrBuf;

/// Handle to a heap cell. Index order is address order: the five permanent
/// singletons occupy the low indices, segment cells start at
/// [`Ptr::FIRST_CELL`] and each new segment extends the range contiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ptr(pub(crate) u32);

impl Ptr {
    /// The empty list, unique and permanently marked.
    pub const NIL: Ptr = Ptr(0);
    /// `#t`
    pub const T: Ptr = Ptr(1);
    /// `#f`
    pub const F: Ptr = Ptr(2);
    /// The end-of-file object.
    pub const EOF_OBJ: Ptr = Ptr(3);
    /// Out-of-memory sink; its car anchors recent allocations for the GC.
    pub const SINK: Ptr = Ptr(4);

    /// Sentinel used as the "null parent" of the link-inversion marker.
    /// Never a valid cell index.
    pub(crate) const NONE: Ptr = Ptr(u32::MAX);

    /// First index backed by segment storage.
    pub(crate) const FIRST_CELL: u32 = 8;

    pub(crate) fn offset(self, n: u32) -> Ptr {
        Ptr(self.0 + n)
    }

    pub fn is_nil(self) -> bool {
        self == Ptr::NIL
    }
}

/// The 5-bit type field. `None` doubles as the free-cell tag, exactly as a
/// zeroed flag word does in the classic layout; the permanent singletons
/// also carry `None` and are told apart by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    None = 0,
    Str,
    Num,
    Sym,
    Proc,
    Pair,
    Closure,
    Continuation,
    Foreign,
    Char,
    Port,
    Vector,
    Macro,
    Promise,
    Environment,
    Bytevector,
}

bitflags! {
    /// Flag bits outside the type field.
    ///
    /// `ATOM` both marks payloads the collector must not descend into and,
    /// transiently, serves as the link-inversion marker's came-via-car note.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        const SYNTAX    = 1 << 12;
        const IMMUTABLE = 1 << 13;
        const ATOM      = 1 << 14;
        const MARK      = 1 << 15;
        /// A promise that has been forced; its car holds the value.
        const FORCED    = 1 << 10;
    }
}

/// One saved continuation frame of the dump stack.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub op: Op,
    pub args: Ptr,
    pub envir: Ptr,
    pub code: Ptr,
}

/// Host procedure callable from Scheme. Receives the interpreter and the
/// (already evaluated) argument list, returns the result value.
pub type ForeignFn = fn(&mut crate::interp::Interp, Ptr) -> Ptr;

/// Cell payload, reinterpreted by [`Tag`].
#[derive(Debug)]
pub enum Kind {
    /// Pair payload; also the shape of free cells (tag `None`, next link in
    /// `cdr`), symbols (name . plist), closures/macros/promises
    /// (code . env) and environments (frame . parent).
    Pair { car: Ptr, cdr: Ptr },
    Num(Num),
    Str(StrBuf),
    Char(u32),
    Proc(Op),
    Foreign(ForeignFn),
    Port(Box<Port>),
    /// Vector header; `len` elements live pairwise in the `(len + 1) / 2`
    /// cells directly after this one.
    Vector { len: u32 },
    Bytevector(Vec<u8>),
    /// Captured dump stack, restored wholesale when invoked.
    Continuation(Box<[Frame]>),
}

/// The uniform heap object.
#[derive(Debug)]
pub struct Cell {
    pub tag: Tag,
    pub flags: Flags,
    pub kind: Kind,
}

impl Cell {
    pub(crate) fn free() -> Cell {
        Cell {
            tag: Tag::None,
            flags: Flags::empty(),
            kind: Kind::Pair {
                car: Ptr::NIL,
                cdr: Ptr::NIL,
            },
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        self.tag == Tag::None && self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_handles_are_distinct() {
        let all = [Ptr::NIL, Ptr::T, Ptr::F, Ptr::EOF_OBJ, Ptr::SINK];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(all.iter().all(|p| p.0 < Ptr::FIRST_CELL));
    }

    #[test]
    fn test_free_cell_shape() {
        let c = Cell::free();
        assert!(c.is_free());
        assert!(matches!(c.kind, Kind::Pair { car: Ptr::NIL, cdr: Ptr::NIL }));
    }

    #[test]
    fn test_ptr_ordering_is_index_ordering() {
        assert!(Ptr(8) < Ptr(9));
        assert!(Ptr::NIL < Ptr(Ptr::FIRST_CELL));
    }
}
