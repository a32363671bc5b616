//! Skiff interpreter kernel
//!
//! An embeddable interpreter for a small Scheme dialect (R5RS with a few
//! R7RS additions: bytevectors, `read-u8`/`peek-u8`, `+inf.0`/`-nan.0`).
//! Values live in a segmented cell heap with a mark-sweep collector; the
//! evaluator is a trampolined opcode loop with an explicit continuation
//! stack, so deep recursion in Scheme never consumes host stack and
//! `call-with-current-continuation` is a snapshot of evaluator state.
//!
//! # Embedding
//!
//! ```rust
//! use skiff_core::Interp;
//!
//! let mut interp = Interp::new().unwrap();
//! interp.set_output_string();
//! interp.load_str("(display (+ 1 2 3))");
//! assert_eq!(interp.output_string(), "6");
//! ```
//!
//! Foreign procedures receive the interpreter and their evaluated argument
//! list and return a value:
//!
//! ```rust
//! use skiff_core::{Interp, Ptr};
//!
//! fn double(interp: &mut Interp, args: Ptr) -> Ptr {
//!     let n = interp.ivalue(interp.car(args));
//!     interp.mk_integer(n * 2)
//! }
//!
//! let mut interp = Interp::new().unwrap();
//! interp.register_foreign("double", double);
//! interp.load_str("(define x (double 21))");
//! ```

pub mod cell;
mod env;
mod eval;
mod gc;
mod heap;
pub mod interp;
pub mod num;
mod oblist;
pub mod opcodes;
pub mod port;
mod primitives;
mod printer;
mod reader;
pub mod skstring;

pub use cell::{ForeignFn, Ptr, Tag};
pub use interp::{Config, Error, Interp};
pub use num::Num;
