//! Environments
//!
//! An environment is a chain of frames. The topmost (global) frame is a
//! hash vector of slot buckets because the interaction environment holds a
//! few hundred bindings; inner frames are plain association lists since
//! they are small and short-lived. A slot is an immutable cons of
//! (symbol . value); lookup compares symbols by pointer identity, which
//! interning makes sufficient.

use crate::cell::{Ptr, Tag};
use crate::interp::Interp;
use crate::oblist::{hash_strbuf, OBJ_LIST_SIZE};

impl Interp {
    /// Push a fresh frame over `old_env` and make it current.
    pub(crate) fn new_frame_in_env(&mut self, old_env: Ptr) {
        let new_frame = if old_env.is_nil() {
            self.mk_vector(OBJ_LIST_SIZE, Ptr::NIL)
        } else {
            Ptr::NIL
        };
        self.envir = self.immutable_cons(new_frame, old_env);
        self.cell_mut(self.envir).tag = Tag::Environment;
    }

    fn frame_hash(&self, frame: Ptr, variable: Ptr) -> u32 {
        let name = self.strbuf(self.car(variable));
        hash_strbuf(name, self.vector_len(frame).max(1))
    }

    pub(crate) fn new_slot_spec_in_env(&mut self, env: Ptr, variable: Ptr, value: Ptr) {
        let slot = self.immutable_cons(variable, value);
        let frame = self.car(env);
        if self.is_vector(frame) {
            let location = self.frame_hash(frame, variable);
            let bucket = self.vector_elem(frame, location);
            let bucket = self.immutable_cons(slot, bucket);
            self.set_vector_elem(frame, location, bucket);
        } else {
            let updated = self.immutable_cons(slot, frame);
            self.set_car_ptr(env, updated);
        }
    }

    pub(crate) fn new_slot_in_env(&mut self, variable: Ptr, value: Ptr) {
        let env = self.envir;
        self.new_slot_spec_in_env(env, variable, value);
    }

    /// Find the slot binding `hdl`, searching outward through the whole
    /// chain when `all` is set, else only the top frame.
    pub(crate) fn find_slot_in_env(&self, env: Ptr, hdl: Ptr, all: bool) -> Ptr {
        let mut x = env;
        while !x.is_nil() {
            let frame = self.car(x);
            let mut y = if self.is_vector(frame) {
                let location = self.frame_hash(frame, hdl);
                self.vector_elem(frame, location)
            } else {
                frame
            };
            while !y.is_nil() {
                if self.caar(y) == hdl {
                    return self.car(y);
                }
                y = self.cdr(y);
            }
            if !all {
                return Ptr::NIL;
            }
            x = self.cdr(x);
        }
        Ptr::NIL
    }

    pub(crate) fn set_slot_in_env(&mut self, slot: Ptr, value: Ptr) {
        self.set_cdr_ptr(slot, value);
    }

    pub(crate) fn slot_value_in_env(&self, slot: Ptr) -> Ptr {
        self.cdr(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_frame_is_hash_vector() {
        let interp = Interp::new().unwrap();
        let frame = interp.car(interp.global_env());
        assert!(interp.is_vector(frame));
        assert_eq!(interp.vector_len(frame), OBJ_LIST_SIZE);
    }

    #[test]
    fn test_inner_frames_shadow_outer() {
        let mut interp = Interp::new().unwrap();
        let x = interp.mk_symbol("x");
        let outer_val = interp.mk_integer(1);
        let genv = interp.global_env();
        interp.define(genv, x, outer_val);

        let global = interp.global_env();
        interp.new_frame_in_env(global);
        let inner_val = interp.mk_integer(2);
        interp.new_slot_in_env(x, inner_val);

        let slot = interp.find_slot_in_env(interp.envir, x, true);
        assert_eq!(interp.slot_value_in_env(slot), inner_val);

        // Top-frame-only search from the global chain still sees the outer.
        let slot = interp.find_slot_in_env(global, x, false);
        assert_eq!(interp.slot_value_in_env(slot), outer_val);
    }

    #[test]
    fn test_define_updates_existing_slot() {
        let mut interp = Interp::new().unwrap();
        let sym = interp.mk_symbol("counter");
        let one = interp.mk_integer(1);
        let two = interp.mk_integer(2);
        let genv = interp.global_env();
        interp.define(genv, sym, one);
        interp.define(genv, sym, two);
        let slot = interp.find_slot_in_env(genv, sym, true);
        assert_eq!(interp.slot_value_in_env(slot), two);
    }

    #[test]
    fn test_unbound_lookup_is_nil() {
        let mut interp = Interp::new().unwrap();
        let sym = interp.mk_symbol("never-bound-anywhere");
        assert!(interp
            .find_slot_in_env(interp.global_env(), sym, true)
            .is_nil());
    }

    #[test]
    fn test_environment_cells_are_tagged() {
        let mut interp = Interp::new().unwrap();
        let global = interp.global_env();
        interp.new_frame_in_env(global);
        assert!(interp.is_environment(interp.envir));
        assert!(interp.is_environment(global));
    }
}
