//! Segmented cell heap and allocator
//!
//! The heap grows in equal-sized segments appended in address order, so
//! cell-index order is address order. The free list is threaded through the
//! cdr slots of free cells and kept ascending; that is what lets vector
//! bodies claim runs of consecutive cells even after fragmentation, because
//! the sweep rebuilds the list sorted.

use tracing::debug;

use crate::cell::{Cell, Flags, Kind, Ptr, Tag};
use crate::interp::Interp;

impl Interp {
    /// Allocate up to `n` fresh segments, linking their cells into the free
    /// list in address order. Returns how many were actually allocated.
    pub(crate) fn alloc_cellseg(&mut self, n: usize) -> usize {
        let mut allocated = 0;
        for _ in 0..n {
            if self.segments.len() >= self.max_segments {
                return allocated;
            }
            let seg_index = self.segments.len() as u32;
            let size = self.segment_size;
            let base = Ptr::FIRST_CELL + seg_index * size;
            let mut cells = Vec::with_capacity(size as usize);
            for off in 0..size {
                let next = if off + 1 < size {
                    Ptr(base + off + 1)
                } else {
                    Ptr::NIL
                };
                cells.push(Cell {
                    tag: Tag::None,
                    flags: Flags::empty(),
                    kind: Kind::Pair {
                        car: Ptr::NIL,
                        cdr: next,
                    },
                });
            }
            self.segments.push(cells.into_boxed_slice());
            self.fcells += size as u64;

            // Insert the new run into the free list in address order.
            let first = Ptr(base);
            let last = Ptr(base + size - 1);
            if self.free_cell.is_nil() || first < self.free_cell {
                self.set_cdr_ptr(last, self.free_cell);
                self.free_cell = first;
            } else {
                let mut p = self.free_cell;
                while !self.cdr(p).is_nil() && first > self.cdr(p) {
                    p = self.cdr(p);
                }
                let rest = self.cdr(p);
                self.set_cdr_ptr(last, rest);
                self.set_cdr_ptr(p, first);
            }
            allocated += 1;
            debug!(segment = seg_index, cells = size, "allocated cell segment");
        }
        allocated
    }

    /// Pop the free-list head without touching the GC. `a` and `b` are
    /// live values the slow path must keep visible to a collection.
    pub(crate) fn get_cell_x(&mut self, a: Ptr, b: Ptr) -> Ptr {
        if !self.free_cell.is_nil() {
            let x = self.free_cell;
            self.free_cell = self.cdr(x);
            self.fcells -= 1;
            x
        } else {
            self.get_cell_slow(a, b)
        }
    }

    fn get_cell_slow(&mut self, a: Ptr, b: Ptr) -> Ptr {
        if self.no_memory {
            return Ptr::SINK;
        }
        if self.free_cell.is_nil() {
            // If a collection recovers only a few cells, grow the heap too,
            // to avoid a treadmill of fruitless collections.
            let min_to_be_recovered = self.segments.len() as u64 * 8;
            self.gc(a, b);
            if self.fcells < min_to_be_recovered || self.free_cell.is_nil() {
                if self.alloc_cellseg(1) == 0 && self.free_cell.is_nil() {
                    self.no_memory = true;
                    return Ptr::SINK;
                }
            }
        }
        let x = self.free_cell;
        self.free_cell = self.cdr(x);
        self.fcells -= 1;
        x
    }

    /// Allocate one cell, tentatively recorded as a pair holding `a` and
    /// `b` and anchored on the sink so an interleaved collection sees all
    /// three before the caller has stored them anywhere reachable.
    pub(crate) fn get_cell(&mut self, a: Ptr, b: Ptr) -> Ptr {
        let cell = self.get_cell_x(a, b);
        {
            let c = self.cell_mut(cell);
            c.tag = Tag::Pair;
            c.flags = Flags::empty();
            c.kind = Kind::Pair { car: a, cdr: b };
        }
        self.push_recent_alloc(cell, Ptr::NIL);
        cell
    }

    /// Chain a freshly allocated object onto the sink's car.
    pub(crate) fn push_recent_alloc(&mut self, recent: Ptr, extra: Ptr) {
        let holder = self.get_cell_x(recent, extra);
        let chain = self.car(Ptr::SINK);
        {
            let c = self.cell_mut(holder);
            c.tag = Tag::Pair;
            c.flags = Flags::IMMUTABLE;
            c.kind = Kind::Pair {
                car: recent,
                cdr: chain,
            };
        }
        self.set_car_ptr(Ptr::SINK, holder);
    }

    /// Allocations from the previous evaluator step are now either held in
    /// registers or garbage; drop the anchor chain.
    pub(crate) fn ok_to_freely_gc(&mut self) {
        self.set_car_ptr(Ptr::SINK, Ptr::NIL);
    }

    /// Reserve `n` consecutive cells, collecting and growing as needed.
    pub(crate) fn get_consecutive_cells(&mut self, n: u32) -> Ptr {
        if self.no_memory {
            return Ptr::SINK;
        }
        let x = self.find_consecutive_cells(n);
        if !x.is_nil() {
            return x;
        }
        self.gc(Ptr::NIL, Ptr::NIL);
        let x = self.find_consecutive_cells(n);
        if !x.is_nil() {
            return x;
        }
        if self.alloc_cellseg(1) == 0 {
            self.no_memory = true;
            return Ptr::SINK;
        }
        let x = self.find_consecutive_cells(n);
        if !x.is_nil() {
            return x;
        }
        self.no_memory = true;
        Ptr::SINK
    }

    fn count_consecutive_cells(&self, x: Ptr, needed: u32) -> u32 {
        let mut n = 1;
        let mut x = x;
        while self.cdr(x) == Ptr(x.0 + 1) {
            x = self.cdr(x);
            n += 1;
            if n > needed {
                return n;
            }
        }
        n
    }

    /// First-fit scan of the free list for a run of `n` consecutive cells;
    /// detaches and returns the run, or NIL.
    fn find_consecutive_cells(&mut self, n: u32) -> Ptr {
        let mut prev = Ptr::NONE;
        let mut x = self.free_cell;
        while !x.is_nil() {
            let cnt = self.count_consecutive_cells(x, n);
            if cnt >= n {
                let rest = self.cdr(Ptr(x.0 + n - 1));
                if prev == Ptr::NONE {
                    self.free_cell = rest;
                } else {
                    self.set_cdr_ptr(prev, rest);
                }
                self.fcells -= n as u64;
                return x;
            }
            prev = Ptr(x.0 + cnt - 1);
            x = self.cdr(prev);
        }
        Ptr::NIL
    }

    /// Vector allocation: a header cell plus `len/2 + len%2` body cells,
    /// reserved as one consecutive run.
    pub(crate) fn get_vector_object(&mut self, len: u32, init: Ptr) -> Ptr {
        let cells = self.get_consecutive_cells(len / 2 + len % 2 + 1);
        if self.no_memory {
            return Ptr::SINK;
        }
        {
            let c = self.cell_mut(cells);
            c.tag = Tag::Vector;
            c.flags = Flags::ATOM;
            c.kind = Kind::Vector { len };
        }
        self.fill_vector(cells, init);
        self.push_recent_alloc(cells, Ptr::NIL);
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Config;

    #[test]
    fn test_free_list_is_ascending_after_init() {
        let interp = Interp::new().unwrap();
        let mut p = interp.free_cell;
        let mut prev = Ptr::NIL;
        let mut count = 0u64;
        while !p.is_nil() {
            if !prev.is_nil() {
                assert!(prev < p, "free list out of address order");
            }
            prev = p;
            p = interp.cdr(p);
            count += 1;
        }
        assert_eq!(count, interp.fcells);
    }

    #[test]
    fn test_segment_cap_is_respected() {
        let mut interp = Interp::with_config(Config {
            segment_size: 2000,
            max_segments: 3,
            step_limit: None,
        })
        .unwrap();
        assert_eq!(interp.segments.len(), 3);
        assert_eq!(interp.alloc_cellseg(1), 0);
    }

    #[test]
    fn test_vector_reservation_is_consecutive() {
        let mut interp = Interp::new().unwrap();
        let v = interp.mk_vector(10, Ptr::NIL);
        // Header plus five body cells, adjacent by index.
        for i in 0..5u32 {
            let body = v.offset(1 + i);
            assert!(interp.is_pair(body));
            assert!(interp.is_immutable(body));
        }
    }

    #[test]
    fn test_sticky_out_of_memory_returns_sink() {
        let mut interp = Interp::with_config(Config {
            segment_size: 2000,
            max_segments: 3,
            step_limit: None,
        })
        .unwrap();
        // Exhaust the heap with a chain rooted in a register.
        let mut chain = Ptr::NIL;
        for i in 0.. {
            let n = interp.mk_integer(i);
            if interp.no_memory {
                break;
            }
            chain = interp.cons(n, chain);
            interp.args = chain;
            if interp.no_memory {
                break;
            }
        }
        assert!(interp.no_memory);
        let sink = interp.get_cell(Ptr::NIL, Ptr::NIL);
        assert_eq!(sink, Ptr::SINK);
    }
}
