//! Data primitives
//!
//! Arithmetic, pairs and lists, characters, strings, vectors, bytevectors,
//! predicates, property lists, and the small system operations. Argument
//! counts and kinds were already validated by the dispatcher; handlers only
//! check the conditions the contract table cannot express (bounds,
//! immutability, zero divisors).

use crate::cell::{Kind, Ptr};
use crate::eval::Flow;
use crate::interp::Interp;
use crate::num::{round_per_r5rs, Num};
use crate::opcodes::Op;
use crate::skstring::StrBuf;

impl Interp {
    pub(crate) fn operate_data(&mut self, op: Op) -> Flow {
        match op {
            // ----- math -----
            Op::Inex2Ex => {
                let x = self.car(self.args);
                if self.is_integer(x) {
                    self.s_return(x)
                } else if self.rvalue(x).fract() == 0.0 {
                    let n = self.mk_integer(self.rvalue(x) as i64);
                    self.s_return(n)
                } else {
                    self.error1("inexact->exact: argument not integral:", x)
                }
            }

            Op::Exp | Op::Log | Op::Sin | Op::Cos | Op::Tan | Op::Asin | Op::Acos
            | Op::Sqrt | Op::Floor | Op::Ceiling => {
                let v = self.rvalue(self.car(self.args));
                let r = match op {
                    Op::Exp => v.exp(),
                    Op::Log => v.ln(),
                    Op::Sin => v.sin(),
                    Op::Cos => v.cos(),
                    Op::Tan => v.tan(),
                    Op::Asin => v.asin(),
                    Op::Acos => v.acos(),
                    Op::Sqrt => v.sqrt(),
                    Op::Floor => v.floor(),
                    _ => v.ceil(),
                };
                let r = self.mk_real(r);
                self.s_return(r)
            }

            Op::Atan => {
                let x = self.rvalue(self.car(self.args));
                let r = if self.cdr(self.args).is_nil() {
                    x.atan()
                } else {
                    x.atan2(self.rvalue(self.cadr(self.args)))
                };
                let r = self.mk_real(r);
                self.s_return(r)
            }

            Op::Expt => {
                let x = self.car(self.args);
                let y = self.cadr(self.args);
                let both_int = self.is_integer(x) && self.is_integer(y);
                let result = self.rvalue(x).powf(self.rvalue(y));
                if both_int && result == (result as i64) as f64 {
                    let n = self.mk_integer(result as i64);
                    self.s_return(n)
                } else {
                    let n = self.mk_real(result);
                    self.s_return(n)
                }
            }

            Op::Round => {
                let x = self.car(self.args);
                if self.is_integer(x) {
                    return self.s_return(x);
                }
                let r = self.mk_real(round_per_r5rs(self.rvalue(x)));
                self.s_return(r)
            }

            // ----- arithmetic -----
            Op::Add => {
                let mut v = Num::ZERO;
                let mut x = self.args;
                while !x.is_nil() {
                    v = Num::add(v, self.num(self.car(x)));
                    x = self.cdr(x);
                }
                let n = self.mk_number(v);
                self.s_return(n)
            }

            Op::Mul => {
                let mut v = Num::ONE;
                let mut x = self.args;
                while !x.is_nil() {
                    v = Num::mul(v, self.num(self.car(x)));
                    x = self.cdr(x);
                }
                let n = self.mk_number(v);
                self.s_return(n)
            }

            Op::Sub => {
                let (mut v, mut x) = if self.cdr(self.args).is_nil() {
                    (Num::ZERO, self.args)
                } else {
                    (self.num(self.car(self.args)), self.cdr(self.args))
                };
                while !x.is_nil() {
                    v = Num::sub(v, self.num(self.car(x)));
                    x = self.cdr(x);
                }
                let n = self.mk_number(v);
                self.s_return(n)
            }

            Op::Div => {
                let (mut v, mut x) = if self.cdr(self.args).is_nil() {
                    (Num::ONE, self.args)
                } else {
                    (self.num(self.car(self.args)), self.cdr(self.args))
                };
                while !x.is_nil() {
                    v = Num::div(v, self.num(self.car(x)));
                    x = self.cdr(x);
                }
                let n = self.mk_number(v);
                self.s_return(n)
            }

            Op::IntDiv => {
                let v = self.num(self.car(self.args));
                let x = self.cadr(self.args);
                if self.ivalue(x) == 0 {
                    return self.error0("quotient: division by zero");
                }
                let n = self.mk_number(Num::intdiv(v, self.num(x)));
                self.s_return(n)
            }

            Op::Rem => {
                let v = self.num(self.car(self.args));
                let x = self.cadr(self.args);
                if self.ivalue(x) == 0 {
                    return self.error0("remainder: division by zero");
                }
                let n = self.mk_number(Num::rem(v, self.num(x)));
                self.s_return(n)
            }

            Op::Mod => {
                let v = self.num(self.car(self.args));
                let x = self.cadr(self.args);
                if self.ivalue(x) == 0 {
                    return self.error0("modulo: division by zero");
                }
                let n = self.mk_number(Num::modulo(v, self.num(x)));
                self.s_return(n)
            }

            // ----- pairs -----
            Op::Car => self.s_return(self.caar(self.args)),
            Op::Cdr => self.s_return(self.cdar(self.args)),

            Op::Cons => {
                // Reuse the argument list's first cell as the new pair.
                let second = self.cadr(self.args);
                self.set_cdr_ptr(self.args, second);
                self.s_return(self.args)
            }

            Op::SetCar => {
                let p = self.car(self.args);
                if self.is_immutable(p) {
                    self.error0("set-car!: unable to alter immutable pair")
                } else {
                    let v = self.cadr(self.args);
                    self.set_car_ptr(p, v);
                    self.s_return(p)
                }
            }

            Op::SetCdr => {
                let p = self.car(self.args);
                if self.is_immutable(p) {
                    self.error0("set-cdr!: unable to alter immutable pair")
                } else {
                    let v = self.cadr(self.args);
                    self.set_cdr_ptr(p, v);
                    self.s_return(p)
                }
            }

            // ----- characters -----
            Op::Char2Int => {
                let c = self.charvalue(self.car(self.args));
                let n = self.mk_integer(c as i64);
                self.s_return(n)
            }

            Op::Int2Char => {
                let x = self.car(self.args);
                let v = self.ivalue(x);
                if v < 0 || v > 0x10FFFF || (0xD800..=0xDFFF).contains(&v) {
                    return self.error1("integer->char: value out of range:", x);
                }
                let c = self.mk_character(v as u32);
                self.s_return(c)
            }

            Op::CharUpcase => {
                let c = self.charvalue(self.car(self.args));
                let c = if c < 0x80 {
                    (c as u8).to_ascii_uppercase() as u32
                } else {
                    c
                };
                let c = self.mk_character(c);
                self.s_return(c)
            }

            Op::CharDowncase => {
                let c = self.charvalue(self.car(self.args));
                let c = if c < 0x80 {
                    (c as u8).to_ascii_lowercase() as u32
                } else {
                    c
                };
                let c = self.mk_character(c);
                self.s_return(c)
            }

            // ----- symbols and atoms -----
            Op::Str2Sym => {
                let name = self.string_value(self.car(self.args));
                let s = self.mk_symbol(&name);
                self.s_return(s)
            }

            Op::Str2Atom => {
                let s = self.string_value(self.car(self.args));
                let pf = if self.cdr(self.args).is_nil() {
                    0
                } else {
                    let v = self.ivalue(self.cadr(self.args));
                    if (2..=36).contains(&v) {
                        v
                    } else {
                        -1
                    }
                };
                if pf < 0 {
                    let culprit = self.cadr(self.args);
                    self.error1("string->atom: bad base:", culprit)
                } else if let Some(rest) = s.strip_prefix('#') {
                    let rest = rest.to_string();
                    match self.mk_sharp_const(&rest) {
                        Some(x) => self.s_return(x),
                        None => self.s_return(Ptr::NIL),
                    }
                } else if pf == 0 || pf == 10 {
                    let a = self.mk_atom(&s);
                    self.s_return(a)
                } else {
                    match i64::from_str_radix(&s, pf as u32) {
                        Ok(iv) => {
                            let n = self.mk_integer(iv);
                            self.s_return(n)
                        }
                        Err(_) => self.s_return(Ptr::F),
                    }
                }
            }

            Op::Sym2Str => {
                let name = self.symbol_name(self.car(self.args));
                let x = self.mk_string(&name);
                self.set_immutable(x);
                self.s_return(x)
            }

            Op::Atom2Str => {
                let x = self.car(self.args);
                let pf = if self.cdr(self.args).is_nil() {
                    0
                } else {
                    let v = self.ivalue(self.cadr(self.args));
                    if self.is_number(x) && (2..=36).contains(&v) {
                        v
                    } else {
                        -1
                    }
                };
                if pf < 0 {
                    let culprit = self.cadr(self.args);
                    self.error1("atom->string: bad base:", culprit)
                } else if self.is_number(x)
                    || self.is_character(x)
                    || self.is_string(x)
                    || self.is_symbol(x)
                {
                    let bytes = self.atom_to_bytes(x, pf as i32);
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let s = self.mk_string(&text);
                    self.s_return(s)
                } else {
                    self.error1("atom->string: not an atom:", x)
                }
            }

            // ----- strings -----
            Op::MkString => {
                let len = self.ivalue(self.car(self.args)).max(0) as usize;
                let fill = if self.cdr(self.args).is_nil() {
                    ' ' as u32
                } else {
                    self.charvalue(self.cadr(self.args))
                };
                let s = self.mk_strbuf(StrBuf::filled(len, fill));
                self.s_return(s)
            }

            Op::StrLen => {
                let n = self.strbuf(self.car(self.args)).len();
                let n = self.mk_integer(n as i64);
                self.s_return(n)
            }

            Op::StrRef => {
                let s = self.car(self.args);
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix) as usize;
                if index >= self.strbuf(s).len() {
                    return self.error1("string-ref: out of bounds:", ix);
                }
                let c = self.mk_character(self.strbuf(s).char_at(index));
                self.s_return(c)
            }

            Op::StrSet => {
                let s = self.car(self.args);
                if self.is_immutable(s) {
                    return self.error1("string-set!: unable to alter immutable string:", s);
                }
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix) as usize;
                if index >= self.strbuf(s).len() {
                    return self.error1("string-set!: out of bounds:", ix);
                }
                let c = self.charvalue(self.caddr(self.args));
                self.strbuf_mut(s).set_char(index, c);
                self.s_return(s)
            }

            Op::StrAppend => {
                let mut acc = StrBuf::Narrow(Vec::new());
                let mut x = self.args;
                while !x.is_nil() {
                    let part = self.strbuf(self.car(x)).clone();
                    acc.append(&part);
                    x = self.cdr(x);
                }
                let s = self.mk_strbuf(acc);
                self.s_return(s)
            }

            Op::Substr => {
                let s = self.car(self.args);
                let len = self.strbuf(s).len();
                let ix0 = self.cadr(self.args);
                let index0 = self.ivalue(ix0) as usize;
                if index0 > len {
                    return self.error1("substring: start out of bounds:", ix0);
                }
                let index1 = if self.cddr(self.args).is_nil() {
                    len
                } else {
                    let ix1 = self.caddr(self.args);
                    let v = self.ivalue(ix1) as usize;
                    if v > len || v < index0 {
                        return self.error1("substring: end out of bounds:", ix1);
                    }
                    v
                };
                let sub = self.strbuf(s).substring(index0, index1);
                let s = self.mk_strbuf(sub);
                self.s_return(s)
            }

            // ----- vectors -----
            Op::Vector => {
                let len = self.list_length(self.args);
                if len < 0 {
                    return self.error1("vector: not a proper list:", self.args);
                }
                let vec = self.mk_vector(len as u32, Ptr::NIL);
                if self.no_memory {
                    return self.s_return(Ptr::SINK);
                }
                let mut x = self.args;
                let mut i = 0;
                while self.is_pair(x) {
                    let v = self.car(x);
                    self.set_vector_elem(vec, i, v);
                    i += 1;
                    x = self.cdr(x);
                }
                self.s_return(vec)
            }

            Op::MkVector => {
                let len = self.ivalue(self.car(self.args)).max(0) as u32;
                let fill = if self.cdr(self.args).is_nil() {
                    Ptr::NIL
                } else {
                    self.cadr(self.args)
                };
                let vec = self.mk_vector(len, Ptr::NIL);
                if self.no_memory {
                    return self.s_return(Ptr::SINK);
                }
                if !fill.is_nil() {
                    self.fill_vector(vec, fill);
                }
                self.s_return(vec)
            }

            Op::VecLen => {
                let n = self.vector_len(self.car(self.args));
                let n = self.mk_integer(n as i64);
                self.s_return(n)
            }

            Op::VecRef => {
                let vec = self.car(self.args);
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix);
                if index >= self.vector_len(vec) as i64 {
                    return self.error1("vector-ref: out of bounds:", ix);
                }
                self.s_return(self.vector_elem(vec, index as u32))
            }

            Op::VecSet => {
                let vec = self.car(self.args);
                if self.is_immutable(vec) {
                    return self.error1("vector-set!: unable to alter immutable vector:", vec);
                }
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix);
                if index >= self.vector_len(vec) as i64 {
                    return self.error1("vector-set!: out of bounds:", ix);
                }
                let v = self.caddr(self.args);
                self.set_vector_elem(vec, index as u32, v);
                self.s_return(vec)
            }

            // ----- bytevectors -----
            Op::MkBvector => {
                let len = self.ivalue(self.car(self.args)).max(0) as usize;
                let fill = if self.cdr(self.args).is_nil() {
                    0
                } else {
                    self.ivalue(self.cadr(self.args)) as u8
                };
                let bv = self.mk_bytevector(vec![fill; len]);
                self.s_return(bv)
            }

            Op::BvecLen => {
                let n = match &self.cell(self.car(self.args)).kind {
                    Kind::Bytevector(b) => b.len(),
                    _ => 0,
                };
                let n = self.mk_integer(n as i64);
                self.s_return(n)
            }

            Op::BvecRef => {
                let bv = self.car(self.args);
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix) as usize;
                let byte = match &self.cell(bv).kind {
                    Kind::Bytevector(b) => b.get(index).copied(),
                    _ => None,
                };
                match byte {
                    Some(b) => {
                        let n = self.mk_integer(b as i64);
                        self.s_return(n)
                    }
                    None => self.error1("bytevector-u8-ref: out of bounds:", ix),
                }
            }

            Op::BvecSet => {
                let bv = self.car(self.args);
                if self.is_immutable(bv) {
                    return self
                        .error1("bytevector-u8-set!: unable to alter immutable data:", bv);
                }
                let ix = self.cadr(self.args);
                let index = self.ivalue(ix) as usize;
                let v = self.ivalue(self.caddr(self.args)) as u8;
                let ok = match &mut self.cell_mut(bv).kind {
                    Kind::Bytevector(b) => {
                        if index < b.len() {
                            b[index] = v;
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                };
                if ok {
                    self.s_return(bv)
                } else {
                    self.error1("bytevector-u8-set!: out of bounds:", ix)
                }
            }

            // ----- predicates -----
            Op::Not => {
                let b = self.is_false(self.car(self.args));
                self.s_retbool(b)
            }
            Op::BoolP => {
                let x = self.car(self.args);
                self.s_retbool(x == Ptr::T || x == Ptr::F)
            }
            Op::EofObjP => {
                let b = self.car(self.args) == Ptr::EOF_OBJ;
                self.s_retbool(b)
            }
            Op::NullP => {
                let b = self.car(self.args).is_nil();
                self.s_retbool(b)
            }

            Op::NumEq | Op::Less | Op::Gre | Op::Leq | Op::Geq => {
                let comp: fn(Num, Num) -> bool = match op {
                    Op::NumEq => Num::num_eq,
                    Op::Less => Num::lt,
                    Op::Gre => Num::gt,
                    Op::Leq => Num::le,
                    _ => Num::ge,
                };
                let mut x = self.args;
                let mut v = self.num(self.car(x));
                x = self.cdr(x);
                while !x.is_nil() {
                    let w = self.num(self.car(x));
                    if !comp(v, w) {
                        return self.s_retbool(false);
                    }
                    v = w;
                    x = self.cdr(x);
                }
                self.s_retbool(true)
            }

            Op::SymbolP => {
                let b = self.is_symbol(self.car(self.args));
                self.s_retbool(b)
            }
            Op::NumberP => {
                let b = self.is_number(self.car(self.args));
                self.s_retbool(b)
            }
            Op::StringP => {
                let b = self.is_string(self.car(self.args));
                self.s_retbool(b)
            }
            Op::IntegerP => {
                let b = self.is_integer(self.car(self.args));
                self.s_retbool(b)
            }
            Op::RealP => {
                // All numbers are real in this tower.
                let b = self.is_number(self.car(self.args));
                self.s_retbool(b)
            }
            Op::CharP => {
                let b = self.is_character(self.car(self.args));
                self.s_retbool(b)
            }

            Op::CharAP | Op::CharNP | Op::CharWP | Op::CharUP | Op::CharLP => {
                let c = self.charvalue(self.car(self.args));
                let b = c < 0x80 && {
                    let ch = c as u8 as char;
                    match op {
                        Op::CharAP => ch.is_ascii_alphabetic(),
                        Op::CharNP => ch.is_ascii_digit(),
                        Op::CharWP => ch.is_ascii_whitespace() || c == 0x0B,
                        Op::CharUP => ch.is_ascii_uppercase(),
                        _ => ch.is_ascii_lowercase(),
                    }
                };
                self.s_retbool(b)
            }

            Op::PortP => {
                let b = self.is_port(self.car(self.args));
                self.s_retbool(b)
            }
            Op::InPortP => {
                let b = self.is_inport(self.car(self.args));
                self.s_retbool(b)
            }
            Op::OutPortP => {
                let b = self.is_outport(self.car(self.args));
                self.s_retbool(b)
            }
            Op::ProcP => {
                let x = self.car(self.args);
                // Continuations count: (call/cc procedure?) => #t
                let b = self.is_proc(x)
                    || self.is_closure(x)
                    || self.is_continuation(x)
                    || self.is_foreign(x);
                self.s_retbool(b)
            }
            Op::PairP => {
                let b = self.is_pair(self.car(self.args));
                self.s_retbool(b)
            }
            Op::ListP => {
                let b = self.list_length(self.car(self.args)) >= 0;
                self.s_retbool(b)
            }
            Op::EnvP => {
                let b = self.is_environment(self.car(self.args));
                self.s_retbool(b)
            }
            Op::VectorP => {
                let b = self.is_vector(self.car(self.args));
                self.s_retbool(b)
            }
            Op::BvectorP => {
                let b = self.is_bytevector(self.car(self.args));
                self.s_retbool(b)
            }

            Op::Eq => {
                let b = self.car(self.args) == self.cadr(self.args);
                self.s_retbool(b)
            }
            Op::Eqv => {
                let b = self.eqv(self.car(self.args), self.cadr(self.args));
                self.s_retbool(b)
            }

            Op::CurrSec => {
                let t = self.mk_real(Self::current_second());
                self.s_return(t)
            }
            Op::EvalCnt => {
                let n = self.mk_integer(self.step_count as i64);
                self.s_return(n)
            }

            // ----- lists -----
            Op::Reverse => {
                let r = self.reverse(self.car(self.args));
                self.s_return(r)
            }

            Op::ListStar => {
                let r = self.list_star(self.args);
                self.s_return(r)
            }

            Op::Append => {
                let mut x = Ptr::NIL;
                let mut y = self.args;
                if y == x {
                    return self.s_return(x);
                }
                // cdr in the loop condition: the last argument becomes the
                // shared tail untouched.
                while !self.cdr(y).is_nil() {
                    x = self.revappend(x, self.car(y));
                    y = self.cdr(y);
                    if x == Ptr::F {
                        return self.error0("non-list argument to append");
                    }
                }
                let tail = self.car(y);
                let r = self.reverse_in_place(tail, x);
                self.s_return(r)
            }

            Op::ListLength => {
                let v = self.list_length(self.car(self.args));
                if v < 0 {
                    let culprit = self.car(self.args);
                    return self.error1("length: not a list:", culprit);
                }
                let n = self.mk_integer(v);
                self.s_return(n)
            }

            Op::Assq => {
                let x = self.car(self.args);
                let mut y = self.cadr(self.args);
                while self.is_pair(y) {
                    if !self.is_pair(self.car(y)) {
                        return self.error0("unable to handle non pair element");
                    }
                    if x == self.caar(y) {
                        break;
                    }
                    y = self.cdr(y);
                }
                if self.is_pair(y) {
                    self.s_return(self.car(y))
                } else {
                    self.s_return(Ptr::F)
                }
            }

            Op::GetClosure => {
                let x = self.car(self.args);
                if x.is_nil() {
                    self.s_return(Ptr::F)
                } else if self.is_closure(x) || self.is_macro(x) {
                    let code = self.car(x);
                    let form = self.cons(self.sym_lambda, code);
                    self.s_return(form)
                } else {
                    self.s_return(Ptr::F)
                }
            }

            Op::ClosureP => {
                // A macro object is also a closure-shaped object.
                let b = self.is_closure(self.car(self.args));
                self.s_retbool(b)
            }
            Op::MacroP => {
                let b = self.is_macro(self.car(self.args));
                self.s_retbool(b)
            }

            // ----- property lists -----
            Op::Put => {
                let sym = self.car(self.args);
                let key = self.cadr(self.args);
                if !self.is_symbol(sym) || !self.is_symbol(key) {
                    return self.error0("illegal use of put");
                }
                let value = self.caddr(self.args);
                let mut x = self.cdr(sym);
                while !x.is_nil() {
                    if self.caar(x) == key {
                        break;
                    }
                    x = self.cdr(x);
                }
                if !x.is_nil() {
                    let entry = self.car(x);
                    self.set_cdr_ptr(entry, value);
                } else {
                    let entry = self.cons(key, value);
                    let plist = self.cons(entry, self.cdr(sym));
                    self.set_cdr_ptr(sym, plist);
                }
                self.s_return(Ptr::T)
            }

            Op::Get => {
                let sym = self.car(self.args);
                let key = self.cadr(self.args);
                if !self.is_symbol(sym) || !self.is_symbol(key) {
                    return self.error0("illegal use of get");
                }
                let mut x = self.cdr(sym);
                while !x.is_nil() {
                    if self.caar(x) == key {
                        return self.s_return(self.cdar(x));
                    }
                    x = self.cdr(x);
                }
                self.s_return(Ptr::NIL)
            }

            _ => {
                let msg = format!("{:?}: illegal operator", op);
                self.error0(&msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(interp: &mut Interp, src: &str) -> Ptr {
        interp.load_str(src);
        interp.value()
    }

    #[test]
    fn test_cons_reuses_arg_cell() {
        let mut interp = Interp::new().unwrap();
        interp.set_output_string();
        let v = eval_str(&mut interp, "(cons 1 2)");
        assert!(interp.is_pair(v));
        assert_eq!(interp.ivalue(interp.car(v)), 1);
        assert_eq!(interp.ivalue(interp.cdr(v)), 2);
    }

    #[test]
    fn test_char_classifiers_are_ascii_only() {
        let mut interp = Interp::new().unwrap();
        interp.set_output_string();
        let v = eval_str(&mut interp, "(char-alphabetic? #\\a)");
        assert_eq!(v, Ptr::T);
        let v = eval_str(&mut interp, "(char-alphabetic? #\\x3bb)");
        assert_eq!(v, Ptr::F);
    }
}
