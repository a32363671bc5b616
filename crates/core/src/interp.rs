//! Interpreter state and host bridge
//!
//! `Interp` is the single mutable state: the segmented cell heap, the
//! symbol table, the global environment, the evaluator registers, the dump
//! stack, and the port set. The public API covers embedding: defining
//! globals, registering foreign procedures, loading from files or strings,
//! and calling into Scheme with proper save/restore so nested
//! host->script->host calls compose.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cell::{Cell, Flags, ForeignFn, Frame, Kind, Ptr, Tag};
use crate::num::Num;
use crate::opcodes::Op;
use crate::port::{Port, PortKind};
use crate::reader::Token;
use crate::skstring::StrBuf;

/// Cells per heap segment.
pub const DEFAULT_SEGMENT_SIZE: u32 = 5000;
/// Default ceiling on the number of segments.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;
/// Segments allocated eagerly at startup.
pub(crate) const FIRST_CELLSEGS: usize = 3;
/// Depth limit for nested `load`s.
pub(crate) const MAXFIL: usize = 64;

/// Interpreter construction options.
#[derive(Debug, Clone)]
pub struct Config {
    pub segment_size: u32,
    pub max_segments: usize,
    /// Hard evaluation step budget; exceeding it terminates the process
    /// with exit code 7.
    pub step_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_segments: DEFAULT_MAX_SEGMENTS,
            step_limit: None,
        }
    }
}

/// Host-facing failures. In-language errors never surface here; they go
/// through `*error-hook*` and the interpreter's return code instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not allocate initial cell segments")]
    Init,
    #[error("could not open {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct Interp {
    // Heap
    pub(crate) specials: [Cell; 5],
    pub(crate) segments: Vec<Box<[Cell]>>,
    pub(crate) segment_size: u32,
    pub(crate) max_segments: usize,
    pub(crate) free_cell: Ptr,
    pub(crate) fcells: u64,
    pub(crate) no_memory: bool,
    pub(crate) gc_verbose: bool,

    // Symbols and environments
    pub(crate) oblist: Ptr,
    pub(crate) global_env: Ptr,
    pub(crate) gensym_cnt: u64,

    // Evaluator registers
    pub(crate) op: Op,
    pub(crate) args: Ptr,
    pub(crate) envir: Ptr,
    pub(crate) code: Ptr,
    pub(crate) value: Ptr,
    pub(crate) dump: Vec<Frame>,

    // Ports
    pub(crate) inport: Ptr,
    pub(crate) outport: Ptr,
    pub(crate) save_inport: Ptr,
    pub(crate) loadport: Ptr,
    pub(crate) load_ports: Vec<Ptr>,
    pub(crate) nesting_stack: Vec<i32>,
    pub(crate) nesting: i32,
    pub(crate) backchar: Option<u32>,

    // Reader / printer state
    pub(crate) tok: Token,
    pub(crate) print_flag: bool,

    // Run state
    pub(crate) retcode: i32,
    pub(crate) interactive_repl: bool,
    pub(crate) tracing: i64,
    pub(crate) step_count: u64,
    pub(crate) step_limit: Option<u64>,

    // Host re-entry
    pub(crate) c_nest: Ptr,
    pub(crate) nest_dumps: Vec<Vec<Frame>>,

    // Interned keyword symbols
    pub(crate) sym_lambda: Ptr,
    pub(crate) sym_quote: Ptr,
    pub(crate) sym_qquote: Ptr,
    pub(crate) sym_unquote: Ptr,
    pub(crate) sym_unquotesp: Ptr,
    pub(crate) sym_feed_to: Ptr,
    pub(crate) sym_error_hook: Ptr,
    pub(crate) sym_sharp_hook: Ptr,
    pub(crate) sym_compile_hook: Ptr,
}

impl Interp {
    pub fn new() -> Result<Interp, Error> {
        Interp::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Interp, Error> {
        let mk_singleton = || Cell {
            tag: Tag::None,
            flags: Flags::ATOM | Flags::MARK,
            kind: Kind::Pair {
                car: Ptr::NIL,
                cdr: Ptr::NIL,
            },
        };
        let sink = Cell {
            tag: Tag::Pair,
            flags: Flags::MARK,
            kind: Kind::Pair {
                car: Ptr::NIL,
                cdr: Ptr::NIL,
            },
        };
        let mut interp = Interp {
            specials: [
                mk_singleton(),
                mk_singleton(),
                mk_singleton(),
                mk_singleton(),
                sink,
            ],
            segments: Vec::new(),
            segment_size: config.segment_size.max(64),
            max_segments: config.max_segments.max(FIRST_CELLSEGS),
            free_cell: Ptr::NIL,
            fcells: 0,
            no_memory: false,
            gc_verbose: false,
            oblist: Ptr::NIL,
            global_env: Ptr::NIL,
            gensym_cnt: 0,
            op: Op::T0Lvl,
            args: Ptr::NIL,
            envir: Ptr::NIL,
            code: Ptr::NIL,
            value: Ptr::NIL,
            dump: Vec::new(),
            inport: Ptr::NIL,
            outport: Ptr::NIL,
            save_inport: Ptr::NIL,
            loadport: Ptr::NIL,
            load_ports: Vec::new(),
            nesting_stack: Vec::new(),
            nesting: 0,
            backchar: None,
            tok: Token::Eof,
            print_flag: false,
            retcode: 0,
            interactive_repl: false,
            tracing: 0,
            step_count: 0,
            step_limit: config.step_limit,
            c_nest: Ptr::NIL,
            nest_dumps: Vec::new(),
            sym_lambda: Ptr::NIL,
            sym_quote: Ptr::NIL,
            sym_qquote: Ptr::NIL,
            sym_unquote: Ptr::NIL,
            sym_unquotesp: Ptr::NIL,
            sym_feed_to: Ptr::NIL,
            sym_error_hook: Ptr::NIL,
            sym_sharp_hook: Ptr::NIL,
            sym_compile_hook: Ptr::NIL,
        };

        if interp.alloc_cellseg(FIRST_CELLSEGS) != FIRST_CELLSEGS {
            return Err(Error::Init);
        }

        interp.oblist = interp.oblist_initial_value();

        // Global environment frame, then `else` bound to #t so cond's else
        // clause evaluates true.
        interp.new_frame_in_env(Ptr::NIL);
        interp.global_env = interp.envir;
        let else_sym = interp.mk_symbol("else");
        interp.new_slot_in_env(else_sym, Ptr::T);

        for name in [
            "lambda",
            "quote",
            "define",
            "if",
            "begin",
            "set!",
            "let",
            "let*",
            "letrec",
            "cond",
            "delay",
            "and",
            "or",
            "cons-stream",
            "macro",
            "case",
        ] {
            interp.assign_syntax(name);
        }

        for &op in Op::ALL {
            if let Some(name) = op.info().name {
                let sym = interp.mk_symbol(name);
                let proc = interp.mk_proc(op);
                interp.new_slot_in_env(sym, proc);
            }
        }

        interp.sym_lambda = interp.mk_symbol("lambda");
        interp.sym_quote = interp.mk_symbol("quote");
        interp.sym_qquote = interp.mk_symbol("quasiquote");
        interp.sym_unquote = interp.mk_symbol("unquote");
        interp.sym_unquotesp = interp.mk_symbol("unquote-splicing");
        interp.sym_feed_to = interp.mk_symbol("=>");
        interp.sym_error_hook = interp.mk_symbol("*error-hook*");
        interp.sym_sharp_hook = interp.mk_symbol("*sharp-hook*");
        interp.sym_compile_hook = interp.mk_symbol("*compile-hook*");

        if interp.no_memory {
            return Err(Error::Init);
        }
        Ok(interp)
    }

    // ----- cell access -----

    pub(crate) fn cell(&self, p: Ptr) -> &Cell {
        if p.0 < Ptr::FIRST_CELL {
            &self.specials[p.0 as usize]
        } else {
            let i = p.0 - Ptr::FIRST_CELL;
            &self.segments[(i / self.segment_size) as usize][(i % self.segment_size) as usize]
        }
    }

    pub(crate) fn cell_mut(&mut self, p: Ptr) -> &mut Cell {
        if p.0 < Ptr::FIRST_CELL {
            &mut self.specials[p.0 as usize]
        } else {
            let i = p.0 - Ptr::FIRST_CELL;
            &mut self.segments[(i / self.segment_size) as usize]
                [(i % self.segment_size) as usize]
        }
    }

    pub fn tag(&self, p: Ptr) -> Tag {
        self.cell(p).tag
    }

    pub(crate) fn flags(&self, p: Ptr) -> Flags {
        self.cell(p).flags
    }

    pub fn is_immutable(&self, p: Ptr) -> bool {
        self.flags(p).contains(Flags::IMMUTABLE)
    }

    pub fn set_immutable(&mut self, p: Ptr) {
        self.cell_mut(p).flags.insert(Flags::IMMUTABLE);
    }

    pub(crate) fn is_syntax(&self, p: Ptr) -> bool {
        self.flags(p).contains(Flags::SYNTAX)
    }

    pub fn is_pair(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Pair
    }

    pub fn is_symbol(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Sym
    }

    pub fn is_string(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Str
    }

    pub fn is_number(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Num
    }

    pub fn is_integer(&self, p: Ptr) -> bool {
        matches!(self.cell(p).kind, Kind::Num(Num::Int(_)))
    }

    pub fn is_character(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Char
    }

    pub fn is_vector(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Vector
    }

    pub fn is_bytevector(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Bytevector
    }

    pub fn is_port(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Port
    }

    pub fn is_inport(&self, p: Ptr) -> bool {
        match &self.cell(p).kind {
            Kind::Port(port) if self.tag(p) == Tag::Port => port.is_input(),
            _ => false,
        }
    }

    pub fn is_outport(&self, p: Ptr) -> bool {
        match &self.cell(p).kind {
            Kind::Port(port) if self.tag(p) == Tag::Port => port.is_output(),
            _ => false,
        }
    }

    pub fn is_closure(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Closure
    }

    pub fn is_macro(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Macro
    }

    pub fn is_promise(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Promise
    }

    pub fn is_environment(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Environment
    }

    pub fn is_continuation(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Continuation
    }

    pub fn is_proc(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Proc
    }

    pub fn is_foreign(&self, p: Ptr) -> bool {
        self.tag(p) == Tag::Foreign
    }

    pub(crate) fn is_true(&self, p: Ptr) -> bool {
        p != Ptr::F
    }

    pub(crate) fn is_false(&self, p: Ptr) -> bool {
        p == Ptr::F
    }

    /// Pair-shaped payload read; yields NIL on atoms, so `(car '())` style
    /// internal reads behave like the classic layout.
    pub fn car(&self, p: Ptr) -> Ptr {
        match self.cell(p).kind {
            Kind::Pair { car, .. } => car,
            _ => Ptr::NIL,
        }
    }

    pub fn cdr(&self, p: Ptr) -> Ptr {
        match self.cell(p).kind {
            Kind::Pair { cdr, .. } => cdr,
            _ => Ptr::NIL,
        }
    }

    pub fn caar(&self, p: Ptr) -> Ptr {
        self.car(self.car(p))
    }

    pub fn cadr(&self, p: Ptr) -> Ptr {
        self.car(self.cdr(p))
    }

    pub fn cdar(&self, p: Ptr) -> Ptr {
        self.cdr(self.car(p))
    }

    pub fn cddr(&self, p: Ptr) -> Ptr {
        self.cdr(self.cdr(p))
    }

    pub fn caddr(&self, p: Ptr) -> Ptr {
        self.car(self.cddr(p))
    }

    pub fn cadar(&self, p: Ptr) -> Ptr {
        self.car(self.cdar(p))
    }

    pub fn cdaar(&self, p: Ptr) -> Ptr {
        self.cdr(self.caar(p))
    }

    pub fn cadaar(&self, p: Ptr) -> Ptr {
        self.car(self.cdaar(p))
    }

    pub fn set_car_ptr(&mut self, p: Ptr, v: Ptr) {
        if let Kind::Pair { car, .. } = &mut self.cell_mut(p).kind {
            *car = v;
        }
    }

    pub fn set_cdr_ptr(&mut self, p: Ptr, v: Ptr) {
        if let Kind::Pair { cdr, .. } = &mut self.cell_mut(p).kind {
            *cdr = v;
        }
    }

    pub fn num(&self, p: Ptr) -> Num {
        match self.cell(p).kind {
            Kind::Num(n) => n,
            _ => Num::ZERO,
        }
    }

    pub fn ivalue(&self, p: Ptr) -> i64 {
        self.num(p).ivalue()
    }

    pub fn rvalue(&self, p: Ptr) -> f64 {
        self.num(p).rvalue()
    }

    pub fn charvalue(&self, p: Ptr) -> u32 {
        match self.cell(p).kind {
            Kind::Char(c) => c,
            _ => 0,
        }
    }

    pub(crate) fn strbuf(&self, p: Ptr) -> &StrBuf {
        match &self.cell(p).kind {
            Kind::Str(s) => s,
            _ => panic!("not a string cell"),
        }
    }

    pub(crate) fn strbuf_mut(&mut self, p: Ptr) -> &mut StrBuf {
        match &mut self.cell_mut(p).kind {
            Kind::Str(s) => s,
            _ => panic!("not a string cell"),
        }
    }

    /// Host copy of a string cell's text.
    pub fn string_value(&self, p: Ptr) -> String {
        self.strbuf(p).to_host_string()
    }

    pub(crate) fn port(&self, p: Ptr) -> &Port {
        match &self.cell(p).kind {
            Kind::Port(port) => port,
            _ => panic!("not a port cell"),
        }
    }

    pub(crate) fn port_mut(&mut self, p: Ptr) -> &mut Port {
        match &mut self.cell_mut(p).kind {
            Kind::Port(port) => port,
            _ => panic!("not a port cell"),
        }
    }

    pub fn vector_len(&self, p: Ptr) -> u32 {
        match self.cell(p).kind {
            Kind::Vector { len } => len,
            _ => 0,
        }
    }

    pub(crate) fn proc_op(&self, p: Ptr) -> Op {
        match self.cell(p).kind {
            Kind::Proc(op) => op,
            _ => Op::T0Lvl,
        }
    }

    /// Symbol's print name.
    pub fn symbol_name(&self, p: Ptr) -> String {
        self.string_value(self.car(p))
    }

    // ----- constructors -----

    pub fn cons(&mut self, a: Ptr, b: Ptr) -> Ptr {
        self.make_cons(a, b, false)
    }

    pub fn immutable_cons(&mut self, a: Ptr, b: Ptr) -> Ptr {
        self.make_cons(a, b, true)
    }

    fn make_cons(&mut self, a: Ptr, b: Ptr, immutable: bool) -> Ptr {
        let x = self.get_cell(a, b);
        let cell = self.cell_mut(x);
        cell.tag = Tag::Pair;
        cell.flags = if immutable {
            Flags::IMMUTABLE
        } else {
            Flags::empty()
        };
        cell.kind = Kind::Pair { car: a, cdr: b };
        x
    }

    fn mk_atom_cell(&mut self, tag: Tag, kind: Kind) -> Ptr {
        let x = self.get_cell(Ptr::NIL, Ptr::NIL);
        let cell = self.cell_mut(x);
        cell.tag = tag;
        cell.flags = Flags::ATOM;
        cell.kind = kind;
        x
    }

    pub fn mk_integer(&mut self, n: i64) -> Ptr {
        self.mk_atom_cell(Tag::Num, Kind::Num(Num::Int(n)))
    }

    pub fn mk_real(&mut self, n: f64) -> Ptr {
        self.mk_atom_cell(Tag::Num, Kind::Num(Num::Real(n)))
    }

    pub fn mk_number(&mut self, n: Num) -> Ptr {
        self.mk_atom_cell(Tag::Num, Kind::Num(n))
    }

    pub fn mk_character(&mut self, c: u32) -> Ptr {
        self.mk_atom_cell(Tag::Char, Kind::Char(c))
    }

    pub fn mk_string(&mut self, s: &str) -> Ptr {
        self.mk_strbuf(StrBuf::from_str(s))
    }

    pub fn mk_strbuf(&mut self, s: StrBuf) -> Ptr {
        self.mk_atom_cell(Tag::Str, Kind::Str(s))
    }

    pub fn mk_bytevector(&mut self, bytes: Vec<u8>) -> Ptr {
        self.mk_atom_cell(Tag::Bytevector, Kind::Bytevector(bytes))
    }

    pub fn mk_port(&mut self, port: Port) -> Ptr {
        self.mk_atom_cell(Tag::Port, Kind::Port(Box::new(port)))
    }

    pub fn mk_foreign(&mut self, f: ForeignFn) -> Ptr {
        self.mk_atom_cell(Tag::Foreign, Kind::Foreign(f))
    }

    pub(crate) fn mk_proc(&mut self, op: Op) -> Ptr {
        self.mk_atom_cell(Tag::Proc, Kind::Proc(op))
    }

    /// Make closure; `c` is code, `e` is the captured environment.
    pub(crate) fn mk_closure(&mut self, c: Ptr, e: Ptr) -> Ptr {
        let x = self.get_cell(c, e);
        let cell = self.cell_mut(x);
        cell.tag = Tag::Closure;
        cell.flags = Flags::empty();
        cell.kind = Kind::Pair { car: c, cdr: e };
        x
    }

    pub(crate) fn mk_continuation(&mut self, frames: Box<[Frame]>) -> Ptr {
        self.mk_atom_cell(Tag::Continuation, Kind::Continuation(frames))
    }

    /// Allocate a vector of `len` elements, all `init`.
    pub fn mk_vector(&mut self, len: u32, init: Ptr) -> Ptr {
        self.get_vector_object(len, init)
    }

    pub fn vector_elem(&self, vec: Ptr, i: u32) -> Ptr {
        let body = vec.offset(1 + i / 2);
        if i % 2 == 0 {
            self.car(body)
        } else {
            self.cdr(body)
        }
    }

    pub fn set_vector_elem(&mut self, vec: Ptr, i: u32, v: Ptr) {
        let body = vec.offset(1 + i / 2);
        if i % 2 == 0 {
            self.set_car_ptr(body, v);
        } else {
            self.set_cdr_ptr(body, v);
        }
    }

    pub(crate) fn fill_vector(&mut self, vec: Ptr, obj: Ptr) {
        let len = self.vector_len(vec);
        let cells = len / 2 + len % 2;
        for i in 0..cells {
            let body = vec.offset(1 + i);
            let cell = self.cell_mut(body);
            cell.tag = Tag::Pair;
            cell.flags = Flags::IMMUTABLE;
            cell.kind = Kind::Pair { car: obj, cdr: obj };
        }
    }

    // ----- list utilities -----

    /// Proper-list length; -1 for circular structures, -2 minus the prefix
    /// length for dotted lists. Tortoise and hare.
    pub fn list_length(&self, a: Ptr) -> i64 {
        let mut i = 0i64;
        let mut slow = a;
        let mut fast = a;
        loop {
            if fast.is_nil() {
                return i;
            }
            if !self.is_pair(fast) {
                return -2 - i;
            }
            fast = self.cdr(fast);
            i += 1;
            if fast.is_nil() {
                return i;
            }
            if !self.is_pair(fast) {
                return -2 - i;
            }
            i += 1;
            fast = self.cdr(fast);
            slow = self.cdr(slow);
            if fast == slow {
                return -1;
            }
        }
    }

    pub fn is_list(&self, a: Ptr) -> bool {
        self.list_length(a) >= 0
    }

    /// Fresh reversed copy of a list.
    pub(crate) fn reverse(&mut self, a: Ptr) -> Ptr {
        let mut p = Ptr::NIL;
        let mut a = a;
        while self.is_pair(a) {
            let h = self.car(a);
            p = self.cons(h, p);
            a = self.cdr(a);
        }
        p
    }

    /// Reverse `list` destructively onto `term`.
    pub(crate) fn reverse_in_place(&mut self, term: Ptr, list: Ptr) -> Ptr {
        let mut p = list;
        let mut result = term;
        while !p.is_nil() {
            let q = self.cdr(p);
            self.set_cdr_ptr(p, result);
            result = p;
            p = q;
        }
        result
    }

    /// Prepend the elements of `b`, reversed, onto `a`; `F` signals a
    /// non-list argument.
    pub(crate) fn revappend(&mut self, a: Ptr, b: Ptr) -> Ptr {
        let mut result = a;
        let mut p = b;
        while self.is_pair(p) {
            let h = self.car(p);
            result = self.cons(h, result);
            p = self.cdr(p);
        }
        if p.is_nil() {
            result
        } else {
            Ptr::F
        }
    }

    pub(crate) fn list_star(&mut self, d: Ptr) -> Ptr {
        if self.cdr(d).is_nil() {
            return self.car(d);
        }
        // Copy the spine, then graft the last element as the tail.
        let items = {
            let mut v = Vec::new();
            let mut p = d;
            while self.is_pair(p) {
                v.push(self.car(p));
                p = self.cdr(p);
            }
            v
        };
        let mut result = items[items.len() - 1];
        for &item in items[..items.len() - 1].iter().rev() {
            result = self.cons(item, result);
        }
        result
    }

    /// `eqv?` equivalence on atoms. Numbers compare equal only within the
    /// same exactness class; a fixnum never `eqv?`s a real.
    pub fn eqv(&self, a: Ptr, b: Ptr) -> bool {
        match (self.tag(a), self.tag(b)) {
            (Tag::Str, Tag::Str) => a == b,
            (Tag::Num, Tag::Num) => {
                let (x, y) = (self.num(a), self.num(b));
                if x.is_int() == y.is_int() {
                    Num::num_eq(x, y)
                } else {
                    false
                }
            }
            (Tag::Char, Tag::Char) => self.charvalue(a) == self.charvalue(b),
            (Tag::Port, Tag::Port) => a == b,
            (Tag::Proc, Tag::Proc) => self.proc_op(a) == self.proc_op(b),
            _ => a == b,
        }
    }

    // ----- host API -----

    /// The interaction environment.
    pub fn global_env(&self) -> Ptr {
        self.global_env
    }

    /// Last value produced by the evaluator.
    pub fn value(&self) -> Ptr {
        self.value
    }

    /// Return code of the last load (0 on success).
    pub fn retcode(&self) -> i32 {
        self.retcode
    }

    /// Define or update `symbol` in `envir`'s top frame.
    pub fn define(&mut self, envir: Ptr, symbol: Ptr, value: Ptr) {
        let slot = self.find_slot_in_env(envir, symbol, false);
        if !slot.is_nil() {
            self.set_slot_in_env(slot, value);
        } else {
            self.new_slot_spec_in_env(envir, symbol, value);
        }
    }

    /// Bind a host procedure under `name` in the global environment.
    pub fn register_foreign(&mut self, name: &str, f: ForeignFn) {
        let sym = self.mk_symbol(name);
        let func = self.mk_foreign(f);
        let env = self.global_env;
        self.define(env, sym, func);
    }

    /// Load and evaluate a file. The returned code is 0 on success,
    /// negative when evaluation hit an error, positive for reader-level
    /// failures (unbalanced input).
    pub fn load_path(&mut self, path: &Path) -> Result<i32, Error> {
        let port = Port::from_filename(path, PortKind::INPUT).map_err(|e| Error::Load {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(file = %path.display(), "load");
        self.load_port(port, false);
        Ok(self.retcode)
    }

    /// Evaluate source text from the host.
    pub fn load_str(&mut self, source: &str) -> i32 {
        let port = Port::from_string(source.as_bytes().to_vec(), PortKind::INPUT);
        self.load_port(port, false);
        self.retcode
    }

    /// Run the interactive REPL over stdin until EOF or `(quit)`.
    pub fn run_repl(&mut self) -> i32 {
        self.load_port(Port::from_stdin(), true);
        self.retcode
    }

    /// Load stdin without REPL niceties (the `--` file form).
    pub fn load_stdin(&mut self) -> i32 {
        self.load_port(Port::from_stdin(), false);
        self.retcode
    }

    fn load_port(&mut self, port: Port, interactive: bool) {
        self.dump.clear();
        self.envir = self.global_env;
        let cell = self.mk_port(port);
        self.load_ports.clear();
        self.load_ports.push(cell);
        self.nesting_stack.clear();
        self.nesting_stack.push(0);
        self.nesting = 0;
        self.loadport = cell;
        if !self.is_port(self.inport) {
            // Hosts that never installed an input port read from the load
            // port by default.
            self.inport = cell;
        }
        self.backchar = None;
        self.retcode = 0;
        self.interactive_repl = interactive;
        self.args = self.mk_integer(0);
        self.eval_cycle(Op::T0Lvl);
        if self.retcode == 0 {
            let unbalanced =
                self.nesting != 0 || self.nesting_stack.iter().any(|&n| n != 0);
            self.retcode = i32::from(unbalanced);
        }
        debug!(retcode = self.retcode, steps = self.step_count, "load done");
    }

    /// Evaluate a prebuilt expression against the global environment,
    /// preserving whatever evaluation the host interrupted.
    pub fn eval(&mut self, obj: Ptr) -> Ptr {
        let old_repl = self.interactive_repl;
        self.interactive_repl = false;
        self.save_from_host_call();
        self.args = Ptr::NIL;
        self.code = obj;
        self.retcode = 0;
        self.eval_cycle(Op::Eval);
        self.interactive_repl = old_repl;
        self.restore_from_host_call();
        self.value
    }

    /// Apply a prebuilt procedure to a prebuilt argument list.
    pub fn call(&mut self, func: Ptr, args: Ptr) -> Ptr {
        let old_repl = self.interactive_repl;
        self.interactive_repl = false;
        self.save_from_host_call();
        self.envir = self.global_env;
        self.args = args;
        self.code = func;
        self.retcode = 0;
        self.eval_cycle(Op::Apply);
        self.interactive_repl = old_repl;
        self.restore_from_host_call();
        self.value
    }

    fn save_from_host_call(&mut self) {
        let sink_car = self.car(Ptr::SINK);
        let envir = self.envir;
        let tail = self.cons(envir, Ptr::NIL);
        let saved = self.cons(sink_car, tail);
        let nest = self.c_nest;
        self.c_nest = self.cons(saved, nest);
        self.nest_dumps.push(std::mem::take(&mut self.dump));
    }

    fn restore_from_host_call(&mut self) {
        let saved = self.car(self.c_nest);
        let sink_car = self.car(saved);
        self.set_car_ptr(Ptr::SINK, sink_car);
        self.envir = self.cadr(saved);
        self.c_nest = self.cdr(self.c_nest);
        self.dump = self.nest_dumps.pop().unwrap_or_default();
    }

    // ----- host port control -----

    pub fn set_input_stdin(&mut self) {
        self.inport = self.mk_port(Port::from_stdin());
    }

    pub fn set_output_stdout(&mut self) {
        self.outport = self.mk_port(Port::from_stdout());
    }

    pub fn set_input_string(&mut self, source: &str) {
        let port = Port::from_string(source.as_bytes().to_vec(), PortKind::INPUT);
        self.inport = self.mk_port(port);
    }

    /// Route output into a growable in-memory buffer.
    pub fn set_output_string(&mut self) {
        self.outport = self.mk_port(Port::from_scratch());
    }

    /// Contents of the output buffer installed by `set_output_string`.
    pub fn output_string(&self) -> String {
        if !self.is_port(self.outport) {
            return String::new();
        }
        match self.port(self.outport).output_bytes() {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => String::new(),
        }
    }

    // ----- load stack -----

    pub(crate) fn file_push(&mut self, fname: &str) -> bool {
        if self.load_ports.len() >= MAXFIL {
            return false;
        }
        match Port::from_filename(Path::new(fname), PortKind::INPUT) {
            Ok(port) => {
                let cell = self.mk_port(port);
                self.load_ports.push(cell);
                self.nesting_stack.push(0);
                self.loadport = cell;
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn file_pop(&mut self) {
        if self.load_ports.len() > 1 {
            self.nesting = self.nesting_stack.pop().unwrap_or(0);
            if let Some(top) = self.load_ports.pop() {
                self.port_mut(top).close(PortKind::INPUT);
            }
            if let Some(&next) = self.load_ports.last() {
                self.loadport = next;
            }
        }
    }

    pub(crate) fn file_interactive(&self) -> bool {
        self.interactive_repl
            && self.load_ports.len() == 1
            && matches!(
                self.port(self.loadport).backend,
                crate::port::Backend::Stdin(_)
            )
    }
}
