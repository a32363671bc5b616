//! Mark-sweep garbage collector
//!
//! Marking uses the Schorr-Deutsch-Waite link-inversion walk: while
//! descending through a car or cdr, that link is reversed to point back at
//! the parent, with the ATOM bit recording which side was taken. Marking
//! therefore runs in constant host-stack space over pair structure; vector
//! bodies and captured continuation frames recurse one level per object.
//!
//! The sweep visits segments from the highest address down and each segment
//! from its top down, so the rebuilt free list comes out in ascending
//! address order, which the consecutive-cell reservation for vectors
//! depends on.

use tracing::debug;

use crate::cell::{Cell, Flags, Kind, Ptr, Tag};
use crate::interp::Interp;

enum MarkState {
    Descend,
    DownCdr,
    Ascend,
}

impl Interp {
    fn is_marked(&self, p: Ptr) -> bool {
        self.flags(p).contains(Flags::MARK)
    }

    fn set_mark(&mut self, p: Ptr) {
        self.cell_mut(p).flags.insert(Flags::MARK);
    }

    fn clear_mark(&mut self, p: Ptr) {
        self.cell_mut(p).flags.remove(Flags::MARK);
    }

    pub(crate) fn mark(&mut self, a: Ptr) {
        let mut t = Ptr::NONE;
        let mut p = a;
        let mut state = MarkState::Descend;
        loop {
            match state {
                MarkState::Descend => {
                    self.set_mark(p);
                    match self.tag(p) {
                        Tag::Vector => {
                            let len = self.vector_len(p);
                            let cells = len / 2 + len % 2;
                            for i in 0..cells {
                                self.mark(p.offset(1 + i));
                            }
                        }
                        Tag::Continuation => {
                            let roots: Vec<Ptr> = match &self.cell(p).kind {
                                Kind::Continuation(frames) => frames
                                    .iter()
                                    .flat_map(|f| [f.args, f.envir, f.code])
                                    .collect(),
                                _ => Vec::new(),
                            };
                            for r in roots {
                                if !self.is_marked(r) {
                                    self.mark(r);
                                }
                            }
                        }
                        _ => {}
                    }
                    if self.flags(p).contains(Flags::ATOM) {
                        state = MarkState::Ascend;
                        continue;
                    }
                    let q = self.car(p);
                    if !self.is_marked(q) {
                        // Note that we moved through the car.
                        self.cell_mut(p).flags.insert(Flags::ATOM);
                        self.set_car_ptr(p, t);
                        t = p;
                        p = q;
                        state = MarkState::Descend;
                    } else {
                        state = MarkState::DownCdr;
                    }
                }
                MarkState::DownCdr => {
                    let q = self.cdr(p);
                    if !self.is_marked(q) {
                        self.set_cdr_ptr(p, t);
                        t = p;
                        p = q;
                        state = MarkState::Descend;
                    } else {
                        state = MarkState::Ascend;
                    }
                }
                MarkState::Ascend => {
                    if t == Ptr::NONE {
                        return;
                    }
                    let q = t;
                    if self.flags(q).contains(Flags::ATOM) {
                        // Came through the car: restore it, take the cdr next.
                        self.cell_mut(q).flags.remove(Flags::ATOM);
                        t = self.car(q);
                        self.set_car_ptr(q, p);
                        p = q;
                        state = MarkState::DownCdr;
                    } else {
                        t = self.cdr(q);
                        self.set_cdr_ptr(q, p);
                        p = q;
                        state = MarkState::Ascend;
                    }
                }
            }
        }
    }

    /// Collect. `a` and `b` are extra roots from the triggering allocation.
    pub(crate) fn gc(&mut self, a: Ptr, b: Ptr) {
        if self.gc_verbose {
            self.putstr("gc...");
        }

        self.mark(self.oblist);
        self.mark(self.global_env);

        self.mark(self.args);
        self.mark(self.envir);
        self.mark(self.code);
        self.dump_stack_mark();
        self.mark(self.value);
        self.mark(self.inport);
        self.mark(self.save_inport);
        self.mark(self.outport);
        self.mark(self.loadport);
        for i in 0..self.load_ports.len() {
            self.mark(self.load_ports[i]);
        }

        // Recent objects the evaluator does not know about yet, and state
        // saved across nested host calls.
        self.mark(self.car(Ptr::SINK));
        self.mark(self.c_nest);

        self.mark(a);
        self.mark(b);

        self.clear_mark(Ptr::NIL);

        let recovered = self.sweep();
        if self.gc_verbose {
            let msg = format!("done: {} cells were recovered.\n", recovered);
            self.putstr(&msg);
        }
        debug!(recovered, free = self.fcells, "gc");
    }

    fn dump_stack_mark(&mut self) {
        for i in 0..self.dump.len() {
            let f = self.dump[i];
            self.mark(f.args);
            self.mark(f.envir);
            self.mark(f.code);
        }
        for i in 0..self.nest_dumps.len() {
            for j in 0..self.nest_dumps[i].len() {
                let f = self.nest_dumps[i][j];
                self.mark(f.args);
                self.mark(f.envir);
                self.mark(f.code);
            }
        }
    }

    fn sweep(&mut self) -> u64 {
        self.fcells = 0;
        self.free_cell = Ptr::NIL;
        for seg in (0..self.segments.len()).rev() {
            let base = Ptr::FIRST_CELL + seg as u32 * self.segment_size;
            for off in (0..self.segment_size).rev() {
                let p = Ptr(base + off);
                if self.is_marked(p) {
                    self.clear_mark(p);
                } else {
                    if !self.cell(p).is_free() {
                        // Dropping the payload is the finalizer: string and
                        // bytevector buffers free, file ports close.
                        *self.cell_mut(p) = Cell::free();
                    }
                    self.fcells += 1;
                    self.set_cdr_ptr(p, self.free_cell);
                    self.free_cell = p;
                }
            }
        }
        self.fcells
    }
}
