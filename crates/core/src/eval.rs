//! The evaluator
//!
//! A single trampolined loop over the opcode registers. Handlers steer by
//! returning a value through `s_return` (pop a dump frame), tail-jumping
//! with `s_goto`, or pushing a continuation frame with `s_save` first. The
//! evaluator never recurses on user code; reading and printing run on the
//! same dump stack, which is also what `call/cc` captures.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::cell::{Flags, Frame, Kind, Ptr, Tag};
use crate::interp::Interp;
use crate::opcodes::{Op, OpInfo, INF_ARG};
use crate::port::{Port, PortKind};
use crate::reader::{Token, DELIMITERS};

/// Loop steering: keep dispatching, or leave the evaluator.
pub(crate) enum Flow {
    Cont,
    Halt,
}

/// An in-language error about to enter the `*error-hook*` / `Error:` path.
pub(crate) struct Raise {
    pub msg: String,
    pub culprit: Option<Ptr>,
}

impl Interp {
    pub(crate) fn s_save(&mut self, op: Op, args: Ptr, code: Ptr) {
        self.dump.push(Frame {
            op,
            args,
            envir: self.envir,
            code,
        });
    }

    pub(crate) fn s_return(&mut self, a: Ptr) -> Flow {
        self.value = a;
        match self.dump.pop() {
            None => Flow::Halt,
            Some(f) => {
                self.op = f.op;
                self.args = f.args;
                self.envir = f.envir;
                self.code = f.code;
                Flow::Cont
            }
        }
    }

    fn s_goto(&mut self, op: Op) -> Flow {
        self.op = op;
        Flow::Cont
    }

    pub(crate) fn s_retbool(&mut self, b: bool) -> Flow {
        self.s_return(if b { Ptr::T } else { Ptr::F })
    }

    pub(crate) fn error0(&mut self, msg: &str) -> Flow {
        self.raise(Raise {
            msg: msg.to_string(),
            culprit: None,
        })
    }

    pub(crate) fn error1(&mut self, msg: &str, culprit: Ptr) -> Flow {
        self.raise(Raise {
            msg: msg.to_string(),
            culprit: Some(culprit),
        })
    }

    /// Route an error through `*error-hook*` when bound, else to the
    /// `Error:`-printing opcode. Errors raised while loading a file are
    /// prefixed with the file position.
    pub(crate) fn raise(&mut self, r: Raise) -> Flow {
        let mut msg = r.msg;
        {
            let lp = self.loadport;
            if self.is_port(lp) {
                let port = self.port(lp);
                if port.kind.contains(PortKind::FILE) {
                    if let Some(fname) = &port.filename {
                        msg = format!("({} : {}) {}", fname, port.curr_line + 1, msg);
                    }
                }
            }
        }
        let hook_slot = self.find_slot_in_env(self.envir, self.sym_error_hook, true);
        if !hook_slot.is_nil() {
            let mut code = match r.culprit {
                Some(a) => {
                    let quoted = self.cons(a, Ptr::NIL);
                    let quoted = self.cons(self.sym_quote, quoted);
                    self.cons(quoted, Ptr::NIL)
                }
                None => Ptr::NIL,
            };
            let msg_cell = self.mk_string(&msg);
            self.set_immutable(msg_cell);
            code = self.cons(msg_cell, code);
            let hook = self.slot_value_in_env(hook_slot);
            self.code = self.cons(hook, code);
            self.op = Op::Eval;
            Flow::Cont
        } else {
            let mut args = match r.culprit {
                Some(a) => self.cons(a, Ptr::NIL),
                None => Ptr::NIL,
            };
            let msg_cell = self.mk_string(&msg);
            self.set_immutable(msg_cell);
            args = self.cons(msg_cell, args);
            self.args = args;
            self.op = Op::Err0;
            Flow::Cont
        }
    }

    /// The kernel loop: validate the opcode's argument contract, clear the
    /// recent-allocation anchor, dispatch.
    pub(crate) fn eval_cycle(&mut self, op: Op) {
        self.op = op;
        loop {
            let info = self.op.info();
            if let Some(name) = info.name {
                if let Err(msg) = self.validate_args(name, &info) {
                    let _ = self.raise(Raise {
                        msg,
                        culprit: None,
                    });
                    continue;
                }
            }
            self.ok_to_freely_gc();
            if matches!(self.operate(self.op), Flow::Halt) {
                return;
            }
            if self.no_memory {
                eprintln!("No memory!");
                self.retcode = 9;
                return;
            }
        }
    }

    fn validate_args(&self, name: &str, info: &OpInfo) -> Result<(), String> {
        let n = self.list_length(self.args);
        if n < info.min_arity as i64 {
            return Err(format!(
                "{}: needs{} {} argument(s)",
                name,
                if info.min_arity == info.max_arity {
                    ""
                } else {
                    " at least"
                },
                info.min_arity
            ));
        }
        if info.max_arity != INF_ARG && n > info.max_arity as i64 {
            return Err(format!(
                "{}: needs{} {} argument(s)",
                name,
                if info.min_arity == info.max_arity {
                    ""
                } else {
                    " at most"
                },
                info.max_arity
            ));
        }
        if !info.arg_kinds.is_empty() {
            let mut arglist = self.args;
            for i in 0..n as usize {
                let kind = info.arg_kinds[i.min(info.arg_kinds.len() - 1)];
                let arg = self.car(arglist);
                if !kind.check(self, arg) {
                    return Err(format!(
                        "{}: argument {} must be: {}",
                        name,
                        i + 1,
                        kind.kind_name()
                    ));
                }
                arglist = self.cdr(arglist);
            }
        }
        Ok(())
    }

    /// Syntactic keyword dispatch.
    fn syntax_op(&self, sym: Ptr) -> Op {
        match self.symbol_name(sym).as_str() {
            "lambda" => Op::Lambda,
            "quote" => Op::Quote,
            "define" => Op::Def0,
            "if" => Op::If0,
            "begin" => Op::Begin,
            "set!" => Op::Set0,
            "let" => Op::Let0,
            "let*" => Op::Let0Ast,
            "letrec" => Op::Let0Rec,
            "cond" => Op::Cond0,
            "delay" => Op::Delay,
            "and" => Op::And0,
            "or" => Op::Or0,
            "cons-stream" => Op::C0Stream,
            "macro" => Op::Macro0,
            _ => Op::Case0,
        }
    }

    fn operate(&mut self, op: Op) -> Flow {
        match op {
            // ----- top level -----
            Op::Load => {
                let name = self.string_value(self.car(self.args));
                if self.file_interactive() {
                    let msg = format!("Loading {}\n", name);
                    self.putstr(&msg);
                }
                if !self.file_push(&name) {
                    let culprit = self.car(self.args);
                    self.error1("unable to open", culprit)
                } else {
                    self.args = self.mk_integer(self.load_ports.len() as i64 - 1);
                    self.s_goto(Op::T0Lvl)
                }
            }

            Op::T0Lvl => {
                if self
                    .port(self.loadport)
                    .kind
                    .contains(PortKind::SAW_EOF)
                {
                    if self.load_ports.len() == 1 {
                        self.args = Ptr::NIL;
                        return self.s_goto(Op::Quit);
                    }
                    self.file_pop();
                    return self.s_return(self.value);
                }
                if self.file_interactive() {
                    self.envir = self.global_env;
                    self.dump.clear();
                    self.putstr("\nskiff> ");
                }
                self.nesting = 0;
                self.save_inport = self.inport;
                self.inport = self.loadport;
                self.s_save(Op::T0Lvl, Ptr::NIL, Ptr::NIL);
                self.s_save(Op::ValuePrint, Ptr::NIL, Ptr::NIL);
                self.s_save(Op::T1Lvl, Ptr::NIL, Ptr::NIL);
                self.s_goto(Op::ReadInternal)
            }

            Op::T1Lvl => {
                self.code = self.value;
                self.inport = self.save_inport;
                self.s_goto(Op::Eval)
            }

            Op::ReadInternal => {
                self.tok = self.token();
                if self.tok == Token::Eof {
                    return self.s_return(Ptr::EOF_OBJ);
                }
                self.s_goto(Op::RdSexpr)
            }

            Op::Gensym => {
                let g = self.gensym();
                self.s_return(g)
            }

            Op::ValuePrint => {
                // Always on the stack so switching into interactive mode
                // mid-load prints the pending value.
                if self.tracing != 0 {
                    self.putstr("\nGives: ");
                }
                if self.file_interactive() {
                    self.print_flag = true;
                    self.args = self.value;
                    self.s_goto(Op::P0List)
                } else {
                    self.s_return(self.value)
                }
            }

            // ----- evaluation -----
            Op::Eval => {
                self.step_count += 1;
                if let Some(limit) = self.step_limit {
                    if self.step_count >= limit {
                        eprintln!("Eval steps limit reached: {}", self.step_count);
                        std::process::exit(7);
                    }
                }
                if self.tracing != 0 {
                    self.s_save(Op::RealEval, self.args, self.code);
                    self.args = self.code;
                    self.putstr("\nEval: ");
                    return self.s_goto(Op::P0List);
                }
                self.real_eval()
            }
            Op::RealEval => self.real_eval(),

            Op::E0Args => {
                if self.is_macro(self.value) {
                    self.s_save(Op::DoMacro, Ptr::NIL, Ptr::NIL);
                    self.args = self.cons(self.code, Ptr::NIL);
                    self.code = self.value;
                    self.s_goto(Op::Apply)
                } else {
                    self.code = self.cdr(self.code);
                    self.s_goto(Op::E1Args)
                }
            }

            Op::E1Args => {
                self.args = self.cons(self.value, self.args);
                if self.is_pair(self.code) {
                    self.s_save(Op::E1Args, self.args, self.cdr(self.code));
                    self.code = self.car(self.code);
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Eval)
                } else {
                    self.args = self.reverse_in_place(Ptr::NIL, self.args);
                    self.code = self.car(self.args);
                    self.args = self.cdr(self.args);
                    self.s_goto(Op::Apply)
                }
            }

            Op::Tracing => {
                let tr = self.tracing;
                self.tracing = self.ivalue(self.car(self.args));
                let prev = self.mk_integer(tr);
                self.s_return(prev)
            }

            Op::Apply => {
                if self.tracing != 0 {
                    self.s_save(Op::RealApply, self.args, self.code);
                    self.print_flag = true;
                    self.putstr("\nApply to: ");
                    return self.s_goto(Op::P0List);
                }
                self.real_apply()
            }
            Op::RealApply => self.real_apply(),

            Op::DoMacro => {
                self.code = self.value;
                self.s_goto(Op::Eval)
            }

            // ----- lambda, define, set! -----
            Op::Lambda => {
                let hook =
                    self.find_slot_in_env(self.envir, self.sym_compile_hook, true);
                if hook.is_nil() {
                    self.value = self.code;
                    self.lambda1()
                } else {
                    self.s_save(Op::Lambda1, self.args, self.code);
                    self.args = self.cons(self.code, Ptr::NIL);
                    self.code = self.slot_value_in_env(hook);
                    self.s_goto(Op::Apply)
                }
            }
            Op::Lambda1 => self.lambda1(),

            Op::MkClosure => {
                let mut x = self.car(self.args);
                if self.car(x) == self.sym_lambda {
                    x = self.cdr(x);
                }
                let y = if self.cdr(self.args).is_nil() {
                    self.envir
                } else {
                    self.cadr(self.args)
                };
                let cl = self.mk_closure(x, y);
                self.s_return(cl)
            }

            Op::Quote => self.s_return(self.car(self.code)),

            Op::Def0 => {
                if self.is_immutable(self.car(self.code)) {
                    let culprit = self.car(self.code);
                    return self.error1("define: unable to alter immutable", culprit);
                }
                let x;
                if self.is_pair(self.car(self.code)) {
                    x = self.caar(self.code);
                    let body = self.cons(self.cdar(self.code), self.cdr(self.code));
                    self.code = self.cons(self.sym_lambda, body);
                } else {
                    x = self.car(self.code);
                    self.code = self.cadr(self.code);
                }
                if !self.is_symbol(x) {
                    return self.error0("variable is not a symbol");
                }
                self.s_save(Op::Def1, Ptr::NIL, x);
                self.s_goto(Op::Eval)
            }

            Op::Def1 => {
                let slot = self.find_slot_in_env(self.envir, self.code, false);
                if !slot.is_nil() {
                    self.set_slot_in_env(slot, self.value);
                } else {
                    let (sym, value) = (self.code, self.value);
                    self.new_slot_in_env(sym, value);
                }
                self.s_return(self.code)
            }

            Op::DefP => {
                let env = if self.cdr(self.args).is_nil() {
                    self.envir
                } else {
                    self.cadr(self.args)
                };
                let found = !self
                    .find_slot_in_env(env, self.car(self.args), true)
                    .is_nil();
                self.s_retbool(found)
            }

            Op::Set0 => {
                if self.is_immutable(self.car(self.code)) {
                    let culprit = self.car(self.code);
                    return self.error1("set!: unable to alter immutable variable", culprit);
                }
                self.s_save(Op::Set1, Ptr::NIL, self.car(self.code));
                self.code = self.cadr(self.code);
                self.s_goto(Op::Eval)
            }

            Op::Set1 => {
                let slot = self.find_slot_in_env(self.envir, self.code, true);
                if !slot.is_nil() {
                    self.set_slot_in_env(slot, self.value);
                    self.s_return(self.value)
                } else {
                    self.error1("set!: unbound variable:", self.code)
                }
            }

            // ----- control forms -----
            Op::Begin => {
                if !self.is_pair(self.code) {
                    return self.s_return(self.code);
                }
                if !self.cdr(self.code).is_nil() {
                    self.s_save(Op::Begin, Ptr::NIL, self.cdr(self.code));
                }
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::If0 => {
                self.s_save(Op::If1, Ptr::NIL, self.cdr(self.code));
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::If1 => {
                if self.is_true(self.value) {
                    self.code = self.car(self.code);
                } else {
                    // (if #f 1) => () since the missing branch reads as NIL
                    self.code = self.cadr(self.code);
                }
                self.s_goto(Op::Eval)
            }

            Op::Let0 => {
                self.args = Ptr::NIL;
                self.value = self.code;
                self.code = if self.is_symbol(self.car(self.code)) {
                    self.cadr(self.code)
                } else {
                    self.car(self.code)
                };
                self.s_goto(Op::Let1)
            }

            Op::Let1 => {
                self.args = self.cons(self.value, self.args);
                if self.is_pair(self.code) {
                    if !self.is_pair(self.car(self.code))
                        || !self.is_pair(self.cdar(self.code))
                    {
                        let culprit = self.car(self.code);
                        return self
                            .error1("Bad syntax of binding spec in let :", culprit);
                    }
                    self.s_save(Op::Let1, self.args, self.cdr(self.code));
                    self.code = self.cadar(self.code);
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Eval)
                } else {
                    self.args = self.reverse_in_place(Ptr::NIL, self.args);
                    self.code = self.car(self.args);
                    self.args = self.cdr(self.args);
                    self.s_goto(Op::Let2)
                }
            }

            Op::Let2 => {
                self.new_frame_in_env(self.envir);
                let named = self.is_symbol(self.car(self.code));
                let mut x = if named {
                    self.cadr(self.code)
                } else {
                    self.car(self.code)
                };
                let mut y = self.args;
                while !y.is_nil() {
                    let (sym, value) = (self.caar(x), self.car(y));
                    self.new_slot_in_env(sym, value);
                    x = self.cdr(x);
                    y = self.cdr(y);
                }
                if named {
                    let mut x = self.cadr(self.code);
                    self.args = Ptr::NIL;
                    while !x.is_nil() {
                        if !self.is_pair(x) {
                            return self.error1("Bad syntax of binding in let :", x);
                        }
                        if !self.is_list(self.car(x)) {
                            let culprit = self.car(x);
                            return self.error1("Bad syntax of binding in let :", culprit);
                        }
                        self.args = self.cons(self.caar(x), self.args);
                        x = self.cdr(x);
                    }
                    let formals = self.reverse_in_place(Ptr::NIL, self.args);
                    let lambda_body = self.cons(formals, self.cddr(self.code));
                    let closure = self.mk_closure(lambda_body, self.envir);
                    let (name, value) = (self.car(self.code), closure);
                    self.new_slot_in_env(name, value);
                    self.code = self.cddr(self.code);
                    self.args = Ptr::NIL;
                } else {
                    self.code = self.cdr(self.code);
                    self.args = Ptr::NIL;
                }
                self.s_goto(Op::Begin)
            }

            Op::Let0Ast => {
                if self.car(self.code).is_nil() {
                    self.new_frame_in_env(self.envir);
                    self.code = self.cdr(self.code);
                    return self.s_goto(Op::Begin);
                }
                if !self.is_pair(self.car(self.code))
                    || !self.is_pair(self.caar(self.code))
                    || !self.is_pair(self.cdaar(self.code))
                {
                    let culprit = self.car(self.code);
                    return self.error1("Bad syntax of binding spec in let* :", culprit);
                }
                self.s_save(Op::Let1Ast, self.cdr(self.code), self.car(self.code));
                self.code = self.cadaar(self.code);
                self.s_goto(Op::Eval)
            }

            Op::Let1Ast => {
                self.new_frame_in_env(self.envir);
                self.s_goto(Op::Let2Ast)
            }

            Op::Let2Ast => {
                let (sym, value) = (self.caar(self.code), self.value);
                self.new_slot_in_env(sym, value);
                self.code = self.cdr(self.code);
                if self.is_pair(self.code) {
                    self.s_save(Op::Let2Ast, self.args, self.code);
                    self.code = self.cadar(self.code);
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Eval)
                } else {
                    self.code = self.args;
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Begin)
                }
            }

            Op::Let0Rec => {
                self.new_frame_in_env(self.envir);
                self.args = Ptr::NIL;
                self.value = self.code;
                self.code = self.car(self.code);
                self.s_goto(Op::Let1Rec)
            }

            Op::Let1Rec => {
                self.args = self.cons(self.value, self.args);
                if self.is_pair(self.code) {
                    if !self.is_pair(self.car(self.code))
                        || !self.is_pair(self.cdar(self.code))
                    {
                        let culprit = self.car(self.code);
                        return self
                            .error1("Bad syntax of binding spec in letrec :", culprit);
                    }
                    self.s_save(Op::Let1Rec, self.args, self.cdr(self.code));
                    self.code = self.cadar(self.code);
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Eval)
                } else {
                    self.args = self.reverse_in_place(Ptr::NIL, self.args);
                    self.code = self.car(self.args);
                    self.args = self.cdr(self.args);
                    self.s_goto(Op::Let2Rec)
                }
            }

            Op::Let2Rec => {
                let mut x = self.car(self.code);
                let mut y = self.args;
                while !y.is_nil() {
                    let (sym, value) = (self.caar(x), self.car(y));
                    self.new_slot_in_env(sym, value);
                    x = self.cdr(x);
                    y = self.cdr(y);
                }
                self.code = self.cdr(self.code);
                self.args = Ptr::NIL;
                self.s_goto(Op::Begin)
            }

            Op::Cond0 => {
                if !self.is_pair(self.code) {
                    return self.error0("syntax error in cond");
                }
                self.s_save(Op::Cond1, Ptr::NIL, self.code);
                self.code = self.caar(self.code);
                self.s_goto(Op::Eval)
            }

            Op::Cond1 => {
                if self.is_true(self.value) {
                    self.code = self.cdar(self.code);
                    if self.code.is_nil() {
                        return self.s_return(self.value);
                    }
                    if self.car(self.code) == self.sym_feed_to {
                        if !self.is_pair(self.cdr(self.code)) {
                            return self.error0("syntax error in cond");
                        }
                        let quoted = self.cons(self.value, Ptr::NIL);
                        let x = self.cons(self.sym_quote, quoted);
                        let call = self.cons(x, Ptr::NIL);
                        self.code = self.cons(self.cadr(self.code), call);
                        return self.s_goto(Op::Eval);
                    }
                    self.s_goto(Op::Begin)
                } else {
                    self.code = self.cdr(self.code);
                    if self.code.is_nil() {
                        self.s_return(Ptr::NIL)
                    } else {
                        self.s_save(Op::Cond1, Ptr::NIL, self.code);
                        self.code = self.caar(self.code);
                        self.s_goto(Op::Eval)
                    }
                }
            }

            Op::Delay => {
                let body = self.cons(Ptr::NIL, self.code);
                let x = self.mk_closure(body, self.envir);
                self.cell_mut(x).tag = Tag::Promise;
                self.s_return(x)
            }

            Op::And0 => {
                if self.code.is_nil() {
                    return self.s_return(Ptr::T);
                }
                self.s_save(Op::And1, Ptr::NIL, self.cdr(self.code));
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::And1 => {
                if self.is_false(self.value) || self.code.is_nil() {
                    self.s_return(self.value)
                } else {
                    self.s_save(Op::And1, Ptr::NIL, self.cdr(self.code));
                    self.code = self.car(self.code);
                    self.s_goto(Op::Eval)
                }
            }

            Op::Or0 => {
                if self.code.is_nil() {
                    return self.s_return(Ptr::F);
                }
                self.s_save(Op::Or1, Ptr::NIL, self.cdr(self.code));
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::Or1 => {
                if self.is_true(self.value) || self.code.is_nil() {
                    self.s_return(self.value)
                } else {
                    self.s_save(Op::Or1, Ptr::NIL, self.cdr(self.code));
                    self.code = self.car(self.code);
                    self.s_goto(Op::Eval)
                }
            }

            Op::C0Stream => {
                self.s_save(Op::C1Stream, Ptr::NIL, self.cdr(self.code));
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::C1Stream => {
                // Protect the evaluated head in a register across allocation.
                self.args = self.value;
                let body = self.cons(Ptr::NIL, self.code);
                let x = self.mk_closure(body, self.envir);
                self.cell_mut(x).tag = Tag::Promise;
                let pair = self.cons(self.args, x);
                self.s_return(pair)
            }

            Op::Macro0 => {
                let x;
                if self.is_pair(self.car(self.code)) {
                    x = self.caar(self.code);
                    let body = self.cons(self.cdar(self.code), self.cdr(self.code));
                    self.code = self.cons(self.sym_lambda, body);
                } else {
                    x = self.car(self.code);
                    self.code = self.cadr(self.code);
                }
                if !self.is_symbol(x) {
                    return self.error0("variable is not a symbol");
                }
                self.s_save(Op::Macro1, Ptr::NIL, x);
                self.s_goto(Op::Eval)
            }

            Op::Macro1 => {
                self.cell_mut(self.value).tag = Tag::Macro;
                let slot = self.find_slot_in_env(self.envir, self.code, false);
                if !slot.is_nil() {
                    self.set_slot_in_env(slot, self.value);
                } else {
                    let (sym, value) = (self.code, self.value);
                    self.new_slot_in_env(sym, value);
                }
                self.s_return(self.code)
            }

            Op::Case0 => {
                self.s_save(Op::Case1, Ptr::NIL, self.cdr(self.code));
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }

            Op::Case1 => {
                let mut x = self.code;
                while !x.is_nil() {
                    let keys = self.caar(x);
                    if !self.is_pair(keys) {
                        break;
                    }
                    let mut y = keys;
                    while !y.is_nil() {
                        if self.eqv(self.car(y), self.value) {
                            break;
                        }
                        y = self.cdr(y);
                    }
                    if !y.is_nil() {
                        break;
                    }
                    x = self.cdr(x);
                }
                if !x.is_nil() {
                    if self.is_pair(self.caar(x)) {
                        self.code = self.cdar(x);
                        self.s_goto(Op::Begin)
                    } else {
                        // else clause: evaluate its head, then the body
                        self.s_save(Op::Case2, Ptr::NIL, self.cdar(x));
                        self.code = self.caar(x);
                        self.s_goto(Op::Eval)
                    }
                } else {
                    self.s_return(Ptr::NIL)
                }
            }

            Op::Case2 => {
                if self.is_true(self.value) {
                    self.s_goto(Op::Begin)
                } else {
                    self.s_return(Ptr::NIL)
                }
            }

            Op::PApply => {
                self.code = self.car(self.args);
                let rest = self.cdr(self.args);
                self.args = self.list_star(rest);
                self.s_goto(Op::Apply)
            }

            Op::PEval => {
                if !self.cdr(self.args).is_nil() {
                    self.envir = self.cadr(self.args);
                }
                self.code = self.car(self.args);
                self.s_goto(Op::Eval)
            }

            Op::Continuation => {
                self.code = self.car(self.args);
                let snapshot = self.dump.clone().into_boxed_slice();
                let cc = self.mk_continuation(snapshot);
                self.args = self.cons(cc, Ptr::NIL);
                self.s_goto(Op::Apply)
            }

            // ----- promises -----
            Op::Force => {
                self.code = self.car(self.args);
                if self.is_promise(self.code) {
                    if self.flags(self.code).contains(Flags::FORCED) {
                        return self.s_return(self.car(self.code));
                    }
                    self.s_save(Op::SaveForced, Ptr::NIL, self.code);
                    self.args = Ptr::NIL;
                    self.s_goto(Op::Apply)
                } else {
                    self.s_return(self.code)
                }
            }

            Op::SaveForced => {
                // Overwrite the promise in place so every later force
                // returns this same value object.
                let v = self.value;
                let cell = self.cell_mut(self.code);
                cell.flags.insert(Flags::FORCED);
                cell.kind = Kind::Pair {
                    car: v,
                    cdr: Ptr::NIL,
                };
                self.s_return(v)
            }

            // ----- output -----
            Op::Write | Op::Display | Op::WriteChar => {
                if self.is_pair(self.cdr(self.args)) {
                    let target = self.cadr(self.args);
                    if target != self.outport {
                        let x = self.cons(self.outport, Ptr::NIL);
                        self.s_save(Op::SetOutport, x, Ptr::NIL);
                        self.outport = target;
                    }
                }
                self.args = self.car(self.args);
                self.print_flag = op == Op::Write;
                self.s_goto(Op::P0List)
            }

            Op::WriteU8 => {
                if self.is_pair(self.cdr(self.args)) {
                    let target = self.cadr(self.args);
                    if target != self.outport {
                        let x = self.cons(self.outport, Ptr::NIL);
                        self.s_save(Op::SetOutport, x, Ptr::NIL);
                        self.outport = target;
                    }
                }
                let b = self.ivalue(self.car(self.args)) as u8;
                self.putcharacter(b);
                self.s_return(Ptr::T)
            }

            Op::Newline => {
                if self.is_pair(self.args) {
                    let target = self.car(self.args);
                    if target != self.outport {
                        let x = self.cons(self.outport, Ptr::NIL);
                        self.s_save(Op::SetOutport, x, Ptr::NIL);
                        self.outport = target;
                    }
                }
                self.putstr("\n");
                self.s_return(Ptr::T)
            }

            // ----- errors -----
            Op::Err0 => {
                self.retcode = -1;
                if !self.is_string(self.car(self.args)) {
                    let tag = self.mk_string(" -- ");
                    self.args = self.cons(tag, self.args);
                    let head = self.car(self.args);
                    self.set_immutable(head);
                }
                self.putstr("Error: ");
                let msg = self.string_value(self.car(self.args));
                self.putstr(&msg);
                self.args = self.cdr(self.args);
                self.s_goto(Op::Err1)
            }

            Op::Err1 => {
                self.putstr(" ");
                if !self.args.is_nil() {
                    self.s_save(Op::Err1, self.cdr(self.args), Ptr::NIL);
                    self.args = self.car(self.args);
                    self.print_flag = true;
                    self.s_goto(Op::P0List)
                } else {
                    self.putstr("\n");
                    if self.interactive_repl {
                        self.s_goto(Op::T0Lvl)
                    } else {
                        Flow::Halt
                    }
                }
            }

            // ----- system -----
            Op::Quit => {
                if self.is_pair(self.args) {
                    self.retcode = self.ivalue(self.car(self.args)) as i32;
                }
                Flow::Halt
            }

            Op::Gc => {
                self.gc(Ptr::NIL, Ptr::NIL);
                self.s_return(Ptr::T)
            }

            Op::GcVerbose => {
                let was = self.gc_verbose;
                self.gc_verbose = self.car(self.args) != Ptr::F;
                self.s_retbool(was)
            }

            Op::NewSegment => {
                if !self.is_pair(self.args) || !self.is_number(self.car(self.args)) {
                    return self.error0("new-segment: argument must be a number");
                }
                let n = self.ivalue(self.car(self.args)).max(0) as usize;
                self.alloc_cellseg(n);
                self.s_return(Ptr::T)
            }

            Op::Oblist => {
                let all = self.oblist_all_symbols();
                self.s_return(all)
            }

            // ----- ports -----
            Op::CurrInport => self.s_return(self.inport),
            Op::CurrOutport => self.s_return(self.outport),

            Op::OpenInFile | Op::OpenOutFile | Op::OpenInOutFile => {
                let kind = match op {
                    Op::OpenInFile => PortKind::INPUT,
                    Op::OpenOutFile => PortKind::OUTPUT,
                    _ => PortKind::INPUT | PortKind::OUTPUT,
                };
                let name = self.string_value(self.car(self.args));
                match Port::from_filename(std::path::Path::new(&name), kind) {
                    Ok(port) => {
                        let p = self.mk_port(port);
                        self.s_return(p)
                    }
                    Err(_) => self.s_return(Ptr::F),
                }
            }

            Op::OpenInString | Op::OpenInOutString => {
                let kind = if op == Op::OpenInString {
                    PortKind::INPUT
                } else {
                    PortKind::INPUT | PortKind::OUTPUT
                };
                let bytes = self.string_value(self.car(self.args)).into_bytes();
                let p = self.mk_port(Port::from_string(bytes, kind));
                self.s_return(p)
            }

            Op::OpenOutString => {
                let p = if self.car(self.args).is_nil() {
                    self.mk_port(Port::from_scratch())
                } else {
                    let bytes = self.string_value(self.car(self.args)).into_bytes();
                    self.mk_port(Port::output_over(bytes))
                };
                self.s_return(p)
            }

            Op::GetOutString => {
                let p = self.car(self.args);
                let text = self
                    .port(p)
                    .output_bytes()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                match text {
                    Some(text) => {
                        let s = self.mk_string(&text);
                        self.s_return(s)
                    }
                    None => self.s_return(Ptr::F),
                }
            }

            Op::CloseInport => {
                let p = self.car(self.args);
                self.port_mut(p).close(PortKind::INPUT);
                self.s_return(Ptr::T)
            }

            Op::CloseOutport => {
                let p = self.car(self.args);
                self.port_mut(p).close(PortKind::OUTPUT);
                self.s_return(Ptr::T)
            }

            Op::IntEnv => self.s_return(self.global_env),
            Op::CurrEnv => self.s_return(self.envir),

            // ----- reading and printing -----
            Op::Read
            | Op::ReadChar
            | Op::PeekChar
            | Op::ReadU8
            | Op::PeekU8
            | Op::CharReady
            | Op::SetInport
            | Op::SetOutport
            | Op::RdSexpr
            | Op::RdList
            | Op::RdDot
            | Op::RdQuote
            | Op::RdQQuote
            | Op::RdQQuoteVec
            | Op::RdUnquote
            | Op::RdUqtsp
            | Op::RdVec
            | Op::P0List
            | Op::P1List
            | Op::PVecFrom => self.operate_rw(op),

            _ => self.operate_data(op),
        }
    }

    fn lambda1(&mut self) -> Flow {
        let cl = self.mk_closure(self.value, self.envir);
        self.s_return(cl)
    }

    fn real_eval(&mut self) -> Flow {
        if self.is_symbol(self.code) {
            let slot = self.find_slot_in_env(self.envir, self.code, true);
            if !slot.is_nil() {
                let v = self.slot_value_in_env(slot);
                self.s_return(v)
            } else {
                self.error1("eval: unbound variable:", self.code)
            }
        } else if self.is_pair(self.code) {
            let x = self.car(self.code);
            if self.is_symbol(x) && self.is_syntax(x) {
                self.code = self.cdr(self.code);
                let op = self.syntax_op(x);
                self.s_goto(op)
            } else {
                self.s_save(Op::E0Args, Ptr::NIL, self.code);
                self.code = self.car(self.code);
                self.s_goto(Op::Eval)
            }
        } else {
            self.s_return(self.code)
        }
    }

    fn real_apply(&mut self) -> Flow {
        if self.is_proc(self.code) {
            let op = self.proc_op(self.code);
            self.s_goto(op)
        } else if self.is_foreign(self.code) {
            // Anchor the arg list against collection inside the host call.
            self.push_recent_alloc(self.args, Ptr::NIL);
            let f = match &self.cell(self.code).kind {
                Kind::Foreign(f) => *f,
                _ => return self.error0("illegal function"),
            };
            let args = self.args;
            let x = f(self, args);
            self.s_return(x)
        } else if self.is_closure(self.code)
            || self.is_macro(self.code)
            || self.is_promise(self.code)
        {
            let env = self.cdr(self.code);
            self.new_frame_in_env(env);
            let mut x = self.caar(self.code);
            let mut y = self.args;
            while self.is_pair(x) {
                if y.is_nil() {
                    return self.error0("not enough arguments");
                }
                let (sym, value) = (self.car(x), self.car(y));
                self.new_slot_in_env(sym, value);
                x = self.cdr(x);
                y = self.cdr(y);
            }
            if x.is_nil() {
                // Excess arguments are tolerated.
            } else if self.is_symbol(x) {
                self.new_slot_in_env(x, y);
            } else {
                return self.error1("syntax error in closure: not a symbol:", x);
            }
            self.code = self.cdar(self.code);
            self.args = Ptr::NIL;
            self.s_goto(Op::Begin)
        } else if self.is_continuation(self.code) {
            let frames: Vec<Frame> = match &self.cell(self.code).kind {
                Kind::Continuation(fr) => fr.to_vec(),
                _ => Vec::new(),
            };
            self.dump = frames;
            let v = if self.args.is_nil() {
                Ptr::NIL
            } else {
                self.car(self.args)
            };
            self.s_return(v)
        } else {
            self.error0("illegal function")
        }
    }

    /// Reading and printing opcodes. A nesting imbalance carried over from
    /// a finished load surfaces here.
    fn operate_rw(&mut self, op: Op) -> Flow {
        if self.nesting != 0 {
            let n = self.nesting;
            self.nesting = 0;
            self.retcode = -1;
            let culprit = self.mk_integer(n as i64);
            return self.error1("unmatched parentheses:", culprit);
        }
        match op {
            Op::Read => {
                if !self.is_pair(self.args) {
                    return self.s_goto(Op::ReadInternal);
                }
                let target = self.car(self.args);
                if target == self.inport {
                    return self.s_goto(Op::ReadInternal);
                }
                let x = self.inport;
                self.inport = target;
                let saved = self.cons(x, Ptr::NIL);
                self.s_save(Op::SetInport, saved, Ptr::NIL);
                self.s_goto(Op::ReadInternal)
            }

            Op::ReadChar | Op::PeekChar => {
                if self.is_pair(self.args) {
                    let target = self.car(self.args);
                    if target != self.inport {
                        let x = self.cons(self.inport, Ptr::NIL);
                        self.s_save(Op::SetInport, x, Ptr::NIL);
                        self.inport = target;
                    }
                }
                match self.inchar() {
                    None => self.s_return(Ptr::EOF_OBJ),
                    Some(c) => {
                        if op == Op::PeekChar {
                            self.backchar(c);
                        }
                        let ch = self.mk_character(c);
                        self.s_return(ch)
                    }
                }
            }

            Op::ReadU8 | Op::PeekU8 => {
                if self.is_pair(self.args) {
                    let target = self.car(self.args);
                    if target != self.inport {
                        let x = self.cons(self.inport, Ptr::NIL);
                        self.s_save(Op::SetInport, x, Ptr::NIL);
                        self.inport = target;
                    }
                }
                match self.inchar8() {
                    None => self.s_return(Ptr::EOF_OBJ),
                    Some(c) => {
                        if op == Op::PeekU8 {
                            self.backchar(c);
                        }
                        let n = self.mk_integer(c as i64);
                        self.s_return(n)
                    }
                }
            }

            Op::CharReady => {
                let p = if self.is_pair(self.args) {
                    self.car(self.args)
                } else {
                    self.inport
                };
                let ready = self.port(p).kind.contains(PortKind::STRING);
                self.s_retbool(ready)
            }

            Op::SetInport => {
                self.inport = self.car(self.args);
                self.s_return(self.value)
            }

            Op::SetOutport => {
                self.outport = self.car(self.args);
                self.s_return(self.value)
            }

            Op::RdSexpr => self.rd_sexpr(),

            Op::RdList => {
                self.args = self.cons(self.value, self.args);
                self.tok = self.token();
                match self.tok {
                    Token::Eof => self.s_return(Ptr::EOF_OBJ),
                    Token::RParen => {
                        // Swallow one trailing newline for line counting.
                        match self.inchar() {
                            Some(c) if c == '\n' as u32 => {
                                let lp = self.loadport;
                                if self.is_port(lp)
                                    && self.port(lp).kind.contains(PortKind::FILE)
                                {
                                    self.port_mut(lp).curr_line += 1;
                                }
                            }
                            Some(c) => self.backchar(c),
                            None => {}
                        }
                        if let Some(top) = self.nesting_stack.last_mut() {
                            *top -= 1;
                        }
                        let list = self.reverse_in_place(Ptr::NIL, self.args);
                        self.s_return(list)
                    }
                    Token::Dot => {
                        self.s_save(Op::RdDot, self.args, Ptr::NIL);
                        self.tok = self.token();
                        self.s_goto(Op::RdSexpr)
                    }
                    _ => {
                        self.s_save(Op::RdList, self.args, Ptr::NIL);
                        self.s_goto(Op::RdSexpr)
                    }
                }
            }

            Op::RdDot => {
                if self.token() != Token::RParen {
                    self.error0("syntax error: illegal dot expression")
                } else {
                    if let Some(top) = self.nesting_stack.last_mut() {
                        *top -= 1;
                    }
                    let list = self.reverse_in_place(self.value, self.args);
                    self.s_return(list)
                }
            }

            Op::RdQuote => {
                let v = self.cons(self.value, Ptr::NIL);
                let q = self.cons(self.sym_quote, v);
                self.s_return(q)
            }

            Op::RdQQuote => {
                let v = self.cons(self.value, Ptr::NIL);
                let q = self.cons(self.sym_qquote, v);
                self.s_return(q)
            }

            Op::RdQQuoteVec => {
                let v = self.cons(self.value, Ptr::NIL);
                let qq = self.cons(self.sym_qquote, v);
                let inner = self.cons(qq, Ptr::NIL);
                let vec_sym = self.mk_symbol("vector");
                let apply_sym = self.mk_symbol("apply");
                let tail = self.cons(vec_sym, inner);
                let form = self.cons(apply_sym, tail);
                self.s_return(form)
            }

            Op::RdUnquote => {
                let v = self.cons(self.value, Ptr::NIL);
                let q = self.cons(self.sym_unquote, v);
                self.s_return(q)
            }

            Op::RdUqtsp => {
                let v = self.cons(self.value, Ptr::NIL);
                let q = self.cons(self.sym_unquotesp, v);
                self.s_return(q)
            }

            Op::RdVec => {
                self.args = self.value;
                self.s_goto(Op::Vector)
            }

            Op::P0List => {
                if self.is_vector(self.args) {
                    self.putstr("#(");
                    let zero = self.mk_integer(0);
                    self.args = self.cons(self.args, zero);
                    self.s_goto(Op::PVecFrom)
                } else if self.is_environment(self.args) {
                    self.putstr("#<ENVIRONMENT>");
                    self.s_return(Ptr::T)
                } else if !self.is_pair(self.args) {
                    let (p, flag) = (self.args, self.print_flag);
                    self.printatom(p, flag);
                    self.s_return(Ptr::T)
                } else if self.car(self.args) == self.sym_quote
                    && self.ok_abbrev(self.cdr(self.args))
                {
                    self.putstr("'");
                    self.args = self.cadr(self.args);
                    self.s_goto(Op::P0List)
                } else if self.car(self.args) == self.sym_qquote
                    && self.ok_abbrev(self.cdr(self.args))
                {
                    self.putstr("`");
                    self.args = self.cadr(self.args);
                    self.s_goto(Op::P0List)
                } else if self.car(self.args) == self.sym_unquote
                    && self.ok_abbrev(self.cdr(self.args))
                {
                    self.putstr(",");
                    self.args = self.cadr(self.args);
                    self.s_goto(Op::P0List)
                } else if self.car(self.args) == self.sym_unquotesp
                    && self.ok_abbrev(self.cdr(self.args))
                {
                    self.putstr(",@");
                    self.args = self.cadr(self.args);
                    self.s_goto(Op::P0List)
                } else {
                    self.putstr("(");
                    self.s_save(Op::P1List, self.cdr(self.args), Ptr::NIL);
                    self.args = self.car(self.args);
                    self.s_goto(Op::P0List)
                }
            }

            Op::P1List => {
                if self.is_pair(self.args) {
                    self.s_save(Op::P1List, self.cdr(self.args), Ptr::NIL);
                    self.putstr(" ");
                    self.args = self.car(self.args);
                    self.s_goto(Op::P0List)
                } else if self.is_vector(self.args) {
                    self.s_save(Op::P1List, Ptr::NIL, Ptr::NIL);
                    self.putstr(" . ");
                    self.s_goto(Op::P0List)
                } else {
                    if !self.args.is_nil() {
                        self.putstr(" . ");
                        let (p, flag) = (self.args, self.print_flag);
                        self.printatom(p, flag);
                    }
                    self.putstr(")");
                    self.s_return(Ptr::T)
                }
            }

            Op::PVecFrom => {
                let i = self.ivalue(self.cdr(self.args)) as u32;
                let vec = self.car(self.args);
                let len = self.vector_len(vec);
                if i == len {
                    self.putstr(")");
                    self.s_return(Ptr::T)
                } else {
                    let elem = self.vector_elem(vec, i);
                    let counter = self.cdr(self.args);
                    self.cell_mut(counter).kind =
                        Kind::Num(crate::num::Num::Int(i as i64 + 1));
                    self.s_save(Op::PVecFrom, self.args, Ptr::NIL);
                    self.args = elem;
                    if i > 0 {
                        self.putstr(" ");
                    }
                    self.s_goto(Op::P0List)
                }
            }

            _ => self.error0("illegal operator"),
        }
    }

    fn ok_abbrev(&self, x: Ptr) -> bool {
        self.is_pair(x) && self.cdr(x).is_nil()
    }

    fn rd_sexpr(&mut self) -> Flow {
        match self.tok {
            Token::Eof => self.s_return(Ptr::EOF_OBJ),
            Token::Vec => {
                self.s_save(Op::RdVec, Ptr::NIL, Ptr::NIL);
                self.rd_open_list()
            }
            Token::LParen => self.rd_open_list(),
            Token::Quote => {
                self.s_save(Op::RdQuote, Ptr::NIL, Ptr::NIL);
                self.tok = self.token();
                self.s_goto(Op::RdSexpr)
            }
            Token::BQuote => {
                self.tok = self.token();
                if self.tok == Token::Vec {
                    self.s_save(Op::RdQQuoteVec, Ptr::NIL, Ptr::NIL);
                    self.tok = Token::LParen;
                    self.s_goto(Op::RdSexpr)
                } else {
                    self.s_save(Op::RdQQuote, Ptr::NIL, Ptr::NIL);
                    self.s_goto(Op::RdSexpr)
                }
            }
            Token::Comma => {
                self.s_save(Op::RdUnquote, Ptr::NIL, Ptr::NIL);
                self.tok = self.token();
                self.s_goto(Op::RdSexpr)
            }
            Token::AtMark => {
                self.s_save(Op::RdUqtsp, Ptr::NIL, Ptr::NIL);
                self.tok = self.token();
                self.s_goto(Op::RdSexpr)
            }
            Token::Atom => {
                let text = self.readstr_upto(DELIMITERS);
                let atom = self.mk_atom(&text);
                self.s_return(atom)
            }
            Token::AtomDot => {
                let text = format!(".{}", self.readstr_upto(DELIMITERS));
                let atom = self.mk_atom(&text);
                self.s_return(atom)
            }
            Token::DQuote => match self.readstrexp() {
                None => self.error0("Error reading string"),
                Some(s) => {
                    let x = self.mk_strbuf(s);
                    self.set_immutable(x);
                    self.s_return(x)
                }
            },
            Token::Sharp => {
                let hook =
                    self.find_slot_in_env(self.envir, self.sym_sharp_hook, true);
                if hook.is_nil() {
                    self.error0("undefined sharp expression")
                } else {
                    let f = self.slot_value_in_env(hook);
                    self.code = self.cons(f, Ptr::NIL);
                    self.s_goto(Op::Eval)
                }
            }
            Token::SharpConst => {
                let text = self.readstr_upto(DELIMITERS);
                match self.mk_sharp_const(&text) {
                    None => self.error0("undefined sharp expression"),
                    Some(x) => self.s_return(x),
                }
            }
            Token::RParen | Token::Dot => self.error0("syntax error: illegal token"),
        }
    }

    fn rd_open_list(&mut self) -> Flow {
        self.tok = self.token();
        if self.tok == Token::RParen {
            return self.s_return(Ptr::NIL);
        }
        if self.tok == Token::Dot {
            return self.error0("syntax error: illegal dot expression");
        }
        if let Some(top) = self.nesting_stack.last_mut() {
            *top += 1;
        }
        self.s_save(Op::RdList, Ptr::NIL, Ptr::NIL);
        self.s_goto(Op::RdSexpr)
    }

    pub(crate) fn current_second() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
