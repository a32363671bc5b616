//! Symbol interning
//!
//! The oblist is a heap vector of 461 buckets, each a list of symbols.
//! Symbols with equal names are pointer-identical, so `eq?` on symbols is
//! name equality and environment lookup can compare by identity.

use crate::cell::{Flags, Ptr, Tag};
use crate::interp::Interp;
use crate::skstring::{push_utf8, StrBuf};

/// Bucket count of the oblist and of the global environment frame.
pub(crate) const OBJ_LIST_SIZE: u32 = 461;

/// Rotate-left-5 XOR hash over the UTF-8 bytes of a name.
pub(crate) fn hash_str(key: &str, table_size: u32) -> u32 {
    hash_bytes(key.bytes(), table_size)
}

/// Same hash over a stored string buffer, without materializing a host
/// string on the lookup path.
pub(crate) fn hash_strbuf(s: &StrBuf, table_size: u32) -> u32 {
    match s {
        StrBuf::Narrow(b) => hash_bytes(b.iter().copied(), table_size),
        StrBuf::Wide(w) => {
            let mut bytes = Vec::with_capacity(w.len() * 4);
            for &c in w {
                push_utf8(&mut bytes, c);
            }
            hash_bytes(bytes.into_iter(), table_size)
        }
    }
}

fn hash_bytes(bytes: impl Iterator<Item = u8>, table_size: u32) -> u32 {
    let mut hashed: u32 = 0;
    for b in bytes {
        hashed = hashed.rotate_left(5);
        hashed ^= b as u32;
    }
    hashed % table_size
}

impl Interp {
    pub(crate) fn oblist_initial_value(&mut self) -> Ptr {
        self.mk_vector(OBJ_LIST_SIZE, Ptr::NIL)
    }

    fn oblist_add_by_name(&mut self, name: &str) -> Ptr {
        let name_cell = self.mk_string(name);
        self.set_immutable(name_cell);
        let x = self.immutable_cons(name_cell, Ptr::NIL);
        {
            let cell = self.cell_mut(x);
            cell.tag = Tag::Sym;
            cell.flags = Flags::empty();
        }
        let location = hash_str(name, OBJ_LIST_SIZE);
        let bucket = self.vector_elem(self.oblist, location);
        let bucket = self.immutable_cons(x, bucket);
        self.set_vector_elem(self.oblist, location, bucket);
        x
    }

    fn oblist_find_by_name(&self, name: &str) -> Ptr {
        let location = hash_str(name, OBJ_LIST_SIZE);
        let mut x = self.vector_elem(self.oblist, location);
        while !x.is_nil() {
            let sym = self.car(x);
            let stored = self.strbuf(self.car(sym));
            if strbuf_eq_str(stored, name) {
                return sym;
            }
            x = self.cdr(x);
        }
        Ptr::NIL
    }

    /// Intern a symbol by exact name.
    pub fn mk_symbol(&mut self, name: &str) -> Ptr {
        let x = self.oblist_find_by_name(name);
        if !x.is_nil() {
            x
        } else {
            self.oblist_add_by_name(name)
        }
    }

    /// Fresh uninterned-looking symbol with a generated name.
    pub fn gensym(&mut self) -> Ptr {
        loop {
            let name = format!("gensym-{}", self.gensym_cnt);
            self.gensym_cnt += 1;
            if self.oblist_find_by_name(&name).is_nil() {
                return self.oblist_add_by_name(&name);
            }
        }
    }

    /// Register a syntactic keyword: an interned symbol carrying the
    /// SYNTAX flag.
    pub(crate) fn assign_syntax(&mut self, name: &str) {
        let x = self.oblist_add_by_name(name);
        self.cell_mut(x).flags.insert(Flags::SYNTAX);
    }

    /// Snapshot of every interned symbol, as a list.
    pub(crate) fn oblist_all_symbols(&mut self) -> Ptr {
        let mut ob_list = Ptr::NIL;
        for i in 0..OBJ_LIST_SIZE {
            let mut x = self.vector_elem(self.oblist, i);
            while !x.is_nil() {
                let sym = self.car(x);
                ob_list = self.cons(sym, ob_list);
                x = self.cdr(x);
            }
        }
        ob_list
    }
}

fn strbuf_eq_str(s: &StrBuf, name: &str) -> bool {
    match s {
        StrBuf::Narrow(b) => b.as_slice() == name.as_bytes(),
        StrBuf::Wide(w) => {
            let mut chars = name.chars();
            for &c in w.iter() {
                match chars.next() {
                    Some(nc) if nc as u32 == c => {}
                    _ => return false,
                }
            }
            chars.next().is_none()
        }
    }
}
