//! Opcode table
//!
//! Every evaluator state, syntax form, and primitive procedure is an opcode.
//! Named opcodes are the built-in procedures; their entry carries the arity
//! bounds and the ordered argument-kind contract that the dispatcher
//! enforces before the handler runs. The last kind in a contract covers all
//! trailing arguments. Unnamed opcodes are internal continuation states and
//! are never argument-checked.

use crate::cell::{Ptr, Tag};
use crate::interp::Interp;

/// Unbounded maximum arity.
pub const INF_ARG: u32 = u32::MAX;

/// Argument contract kinds, checked positionally by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Any,
    Str,
    Sym,
    Port,
    InPort,
    OutPort,
    Environment,
    Pair,
    /// A pair or `()`.
    List,
    Char,
    Vector,
    Number,
    Integer,
    Natural,
    Bytevector,
}

impl ArgKind {
    pub fn check(self, interp: &Interp, p: Ptr) -> bool {
        match self {
            ArgKind::Any => true,
            ArgKind::Str => interp.tag(p) == Tag::Str,
            ArgKind::Sym => interp.tag(p) == Tag::Sym,
            ArgKind::Port => interp.tag(p) == Tag::Port,
            ArgKind::InPort => interp.is_inport(p),
            ArgKind::OutPort => interp.is_outport(p),
            ArgKind::Environment => interp.tag(p) == Tag::Environment,
            ArgKind::Pair => interp.tag(p) == Tag::Pair,
            ArgKind::List => p.is_nil() || interp.tag(p) == Tag::Pair,
            ArgKind::Char => interp.tag(p) == Tag::Char,
            ArgKind::Vector => interp.tag(p) == Tag::Vector,
            ArgKind::Number => interp.tag(p) == Tag::Num,
            ArgKind::Integer => interp.is_integer(p),
            ArgKind::Natural => interp.is_integer(p) && interp.num(p).ivalue() >= 0,
            ArgKind::Bytevector => interp.tag(p) == Tag::Bytevector,
        }
    }

    pub fn kind_name(self) -> &'static str {
        match self {
            ArgKind::Any => "any",
            ArgKind::Str => "string",
            ArgKind::Sym => "symbol",
            ArgKind::Port => "port",
            ArgKind::InPort => "input port",
            ArgKind::OutPort => "output port",
            ArgKind::Environment => "environment",
            ArgKind::Pair => "pair",
            ArgKind::List => "pair or '()",
            ArgKind::Char => "character",
            ArgKind::Vector => "vector",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Natural => "non-negative integer",
            ArgKind::Bytevector => "bytevector",
        }
    }
}

/// Dispatcher-facing description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    /// Procedure name; `None` for internal continuation states.
    pub name: Option<&'static str>,
    pub min_arity: u32,
    pub max_arity: u32,
    pub arg_kinds: &'static [ArgKind],
}

macro_rules! define_opcodes {
    ($($variant:ident => $name:expr, $min:expr, $max:expr, [$($kind:ident),*];)+) => {
        /// Evaluator opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Op {
            $($variant,)+
        }

        impl Op {
            /// All opcodes, in table order; used to bind the named ones
            /// into the global environment at startup.
            pub const ALL: &'static [Op] = &[$(Op::$variant,)+];

            pub fn info(self) -> OpInfo {
                match self {
                    $(Op::$variant => OpInfo {
                        name: $name,
                        min_arity: $min,
                        max_arity: $max,
                        arg_kinds: &[$(ArgKind::$kind),*],
                    },)+
                }
            }
        }
    };
}

define_opcodes! {
    // Top level, load and eval states
    Load => Some("load"), 1, 1, [Str];
    T0Lvl => None, 0, 0, [];
    T1Lvl => None, 0, 0, [];
    ReadInternal => None, 0, 0, [];
    Gensym => Some("gensym"), 0, 0, [];
    ValuePrint => None, 0, 0, [];
    Eval => None, 0, 0, [];
    RealEval => None, 0, 0, [];
    E0Args => None, 0, 0, [];
    E1Args => None, 0, 0, [];
    Apply => None, 0, 0, [];
    RealApply => None, 0, 0, [];
    Tracing => Some("tracing"), 1, 1, [Natural];
    DoMacro => None, 0, 0, [];

    // Syntax forms
    Lambda => None, 0, 0, [];
    Lambda1 => None, 0, 0, [];
    MkClosure => Some("make-closure"), 1, 2, [Pair, Environment];
    Quote => None, 0, 0, [];
    Def0 => None, 0, 0, [];
    Def1 => None, 0, 0, [];
    DefP => Some("defined?"), 1, 2, [Sym, Environment];
    Set0 => None, 0, 0, [];
    Set1 => None, 0, 0, [];
    Begin => None, 0, 0, [];
    If0 => None, 0, 0, [];
    If1 => None, 0, 0, [];
    Let0 => None, 0, 0, [];
    Let1 => None, 0, 0, [];
    Let2 => None, 0, 0, [];
    Let0Ast => None, 0, 0, [];
    Let1Ast => None, 0, 0, [];
    Let2Ast => None, 0, 0, [];
    Let0Rec => None, 0, 0, [];
    Let1Rec => None, 0, 0, [];
    Let2Rec => None, 0, 0, [];
    Cond0 => None, 0, 0, [];
    Cond1 => None, 0, 0, [];
    Delay => None, 0, 0, [];
    And0 => None, 0, 0, [];
    And1 => None, 0, 0, [];
    Or0 => None, 0, 0, [];
    Or1 => None, 0, 0, [];
    C0Stream => None, 0, 0, [];
    C1Stream => None, 0, 0, [];
    Macro0 => None, 0, 0, [];
    Macro1 => None, 0, 0, [];
    Case0 => None, 0, 0, [];
    Case1 => None, 0, 0, [];
    Case2 => None, 0, 0, [];

    // Control procedures
    PApply => Some("apply"), 1, INF_ARG, [Any];
    PEval => Some("eval"), 1, 2, [Any, Environment];
    Continuation => Some("call-with-current-continuation"), 1, 1, [Any];

    // Math
    Inex2Ex => Some("inexact->exact"), 1, 1, [Number];
    Exp => Some("exp"), 1, 1, [Number];
    Log => Some("log"), 1, 1, [Number];
    Sin => Some("sin"), 1, 1, [Number];
    Cos => Some("cos"), 1, 1, [Number];
    Tan => Some("tan"), 1, 1, [Number];
    Asin => Some("asin"), 1, 1, [Number];
    Acos => Some("acos"), 1, 1, [Number];
    Atan => Some("atan"), 1, 2, [Number];
    Sqrt => Some("sqrt"), 1, 1, [Number];
    Expt => Some("expt"), 2, 2, [Number];
    Floor => Some("floor"), 1, 1, [Number];
    Ceiling => Some("ceiling"), 1, 1, [Number];
    Round => Some("round"), 1, 1, [Number];

    // Arithmetic
    Add => Some("+"), 0, INF_ARG, [Number];
    Mul => Some("*"), 0, INF_ARG, [Number];
    Sub => Some("-"), 1, INF_ARG, [Number];
    Div => Some("/"), 1, INF_ARG, [Number];
    IntDiv => Some("quotient"), 2, 2, [Integer];
    Rem => Some("remainder"), 2, 2, [Integer];
    Mod => Some("modulo"), 2, 2, [Integer];

    // Pairs
    Car => Some("car"), 1, 1, [Pair];
    Cdr => Some("cdr"), 1, 1, [Pair];
    Cons => Some("cons"), 2, 2, [Any];
    SetCar => Some("set-car!"), 2, 2, [Pair, Any];
    SetCdr => Some("set-cdr!"), 2, 2, [Pair, Any];

    // Characters
    Char2Int => Some("char->integer"), 1, 1, [Char];
    Int2Char => Some("integer->char"), 1, 1, [Natural];
    CharUpcase => Some("char-upcase"), 1, 1, [Char];
    CharDowncase => Some("char-downcase"), 1, 1, [Char];

    // Symbols and atoms
    Str2Sym => Some("string->symbol"), 1, 1, [Str];
    Str2Atom => Some("string->atom"), 1, 2, [Str, Natural];
    Sym2Str => Some("symbol->string"), 1, 1, [Sym];
    Atom2Str => Some("atom->string"), 1, 2, [Any, Natural];

    // Strings
    MkString => Some("make-string"), 1, 2, [Natural, Char];
    StrLen => Some("string-length"), 1, 1, [Str];
    StrRef => Some("string-ref"), 2, 2, [Str, Natural];
    StrSet => Some("string-set!"), 3, 3, [Str, Natural, Char];
    StrAppend => Some("string-append"), 0, INF_ARG, [Str];
    Substr => Some("substring"), 2, 3, [Str, Natural];

    // Vectors
    Vector => Some("vector"), 0, INF_ARG, [Any];
    MkVector => Some("make-vector"), 1, 2, [Natural, Any];
    VecLen => Some("vector-length"), 1, 1, [Vector];
    VecRef => Some("vector-ref"), 2, 2, [Vector, Natural];
    VecSet => Some("vector-set!"), 3, 3, [Vector, Natural, Any];

    // Bytevectors
    MkBvector => Some("make-bytevector"), 1, 2, [Natural];
    BvecLen => Some("bytevector-length"), 1, 1, [Bytevector];
    BvecRef => Some("bytevector-u8-ref"), 2, 2, [Bytevector, Natural];
    BvecSet => Some("bytevector-u8-set!"), 3, 3, [Bytevector, Natural, Natural];

    // Predicates and comparison
    Not => Some("not"), 1, 1, [Any];
    BoolP => Some("boolean?"), 1, 1, [Any];
    EofObjP => Some("eof-object?"), 1, 1, [Any];
    NullP => Some("null?"), 1, 1, [Any];
    NumEq => Some("="), 1, INF_ARG, [Number];
    Less => Some("<"), 1, INF_ARG, [Number];
    Gre => Some(">"), 1, INF_ARG, [Number];
    Leq => Some("<="), 1, INF_ARG, [Number];
    Geq => Some(">="), 1, INF_ARG, [Number];
    SymbolP => Some("symbol?"), 1, 1, [Any];
    NumberP => Some("number?"), 1, 1, [Any];
    StringP => Some("string?"), 1, 1, [Any];
    IntegerP => Some("integer?"), 1, 1, [Any];
    RealP => Some("real?"), 1, 1, [Any];
    CharP => Some("char?"), 1, 1, [Any];
    CharAP => Some("char-alphabetic?"), 1, 1, [Char];
    CharNP => Some("char-numeric?"), 1, 1, [Char];
    CharWP => Some("char-whitespace?"), 1, 1, [Char];
    CharUP => Some("char-upper-case?"), 1, 1, [Char];
    CharLP => Some("char-lower-case?"), 1, 1, [Char];
    PortP => Some("port?"), 1, 1, [Any];
    InPortP => Some("input-port?"), 1, 1, [Any];
    OutPortP => Some("output-port?"), 1, 1, [Any];
    ProcP => Some("procedure?"), 1, 1, [Any];
    PairP => Some("pair?"), 1, 1, [Any];
    ListP => Some("list?"), 1, 1, [Any];
    EnvP => Some("environment?"), 1, 1, [Any];
    VectorP => Some("vector?"), 1, 1, [Any];
    BvectorP => Some("bytevector?"), 1, 1, [Any];
    Eq => Some("eq?"), 2, 2, [Any];
    Eqv => Some("eqv?"), 2, 2, [Any];
    CurrSec => Some("current-second"), 0, 0, [];
    EvalCnt => Some("eval-count"), 0, 0, [];

    // Promises
    Force => Some("force"), 1, 1, [Any];
    SaveForced => None, 0, 0, [];

    // Output
    Write => Some("write"), 1, 2, [Any, OutPort];
    Display => Some("display"), 1, 2, [Any, OutPort];
    WriteChar => Some("write-char"), 1, 2, [Char, OutPort];
    WriteU8 => Some("write-u8"), 1, 2, [Natural, OutPort];
    Newline => Some("newline"), 0, 1, [OutPort];

    // Errors
    Err0 => Some("error"), 1, INF_ARG, [Any];
    Err1 => None, 0, 0, [];

    // Lists
    Reverse => Some("reverse"), 1, 1, [List];
    ListStar => Some("list*"), 1, INF_ARG, [Any];
    Append => Some("append"), 0, INF_ARG, [Any];

    // Property lists
    Put => Some("put"), 3, 3, [Any];
    Get => Some("get"), 2, 2, [Any];

    // System
    Quit => Some("quit"), 0, 1, [Number];
    Gc => Some("gc"), 0, 0, [];
    GcVerbose => Some("gc-verbose"), 0, 1, [Any];
    NewSegment => Some("new-segment"), 0, 1, [Number];
    Oblist => Some("oblist"), 0, 0, [];

    // Ports
    CurrInport => Some("current-input-port"), 0, 0, [];
    CurrOutport => Some("current-output-port"), 0, 0, [];
    OpenInFile => Some("open-input-file"), 1, 1, [Str];
    OpenOutFile => Some("open-output-file"), 1, 1, [Str];
    OpenInOutFile => Some("open-input-output-file"), 1, 1, [Str];
    OpenInString => Some("open-input-string"), 1, 1, [Str];
    OpenInOutString => Some("open-input-output-string"), 1, 1, [Str];
    OpenOutString => Some("open-output-string"), 0, 1, [Str];
    GetOutString => Some("get-output-string"), 1, 1, [OutPort];
    CloseInport => Some("close-input-port"), 1, 1, [InPort];
    CloseOutport => Some("close-output-port"), 1, 1, [OutPort];

    // Environments
    IntEnv => Some("interaction-environment"), 0, 0, [];
    CurrEnv => Some("current-environment"), 0, 0, [];

    // Input
    Read => Some("read"), 0, 1, [InPort];
    ReadChar => Some("read-char"), 0, 1, [InPort];
    PeekChar => Some("peek-char"), 0, 1, [InPort];
    ReadU8 => Some("read-u8"), 0, 1, [InPort];
    PeekU8 => Some("peek-u8"), 0, 1, [InPort];
    CharReady => Some("char-ready?"), 0, 1, [InPort];
    SetInport => Some("set-input-port"), 1, 1, [InPort];
    SetOutport => Some("set-output-port"), 1, 1, [OutPort];

    // Reader states
    RdSexpr => None, 0, 0, [];
    RdList => None, 0, 0, [];
    RdDot => None, 0, 0, [];
    RdQuote => None, 0, 0, [];
    RdQQuote => None, 0, 0, [];
    RdQQuoteVec => None, 0, 0, [];
    RdUnquote => None, 0, 0, [];
    RdUqtsp => None, 0, 0, [];
    RdVec => None, 0, 0, [];

    // Printer states
    P0List => None, 0, 0, [];
    P1List => None, 0, 0, [];
    PVecFrom => None, 0, 0, [];

    // List utilities
    ListLength => Some("length"), 1, 1, [List];
    Assq => Some("assq"), 2, 2, [Any];
    GetClosure => Some("get-closure-code"), 1, 1, [Any];
    ClosureP => Some("closure?"), 1, 1, [Any];
    MacroP => Some("macro?"), 1, 1, [Any];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_ops_have_contracts() {
        let info = Op::Car.info();
        assert_eq!(info.name, Some("car"));
        assert_eq!(info.min_arity, 1);
        assert_eq!(info.max_arity, 1);
        assert_eq!(info.arg_kinds, &[ArgKind::Pair]);
    }

    #[test]
    fn test_internal_ops_are_unnamed() {
        assert!(Op::T0Lvl.info().name.is_none());
        assert!(Op::RdSexpr.info().name.is_none());
        assert!(Op::P0List.info().name.is_none());
    }

    #[test]
    fn test_variadic_ops_unbounded() {
        assert_eq!(Op::Add.info().max_arity, INF_ARG);
        assert_eq!(Op::StrAppend.info().min_arity, 0);
    }

    #[test]
    fn test_all_table_has_no_duplicate_names() {
        let mut names: Vec<&str> = Op::ALL
            .iter()
            .filter_map(|op| op.info().name)
            .collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
