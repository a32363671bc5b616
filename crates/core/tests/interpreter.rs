//! End-to-end interpreter tests
//!
//! Whole programs driven through `load_str` with output captured in a
//! string port. These exercise only kernel primitives; programs that need
//! the init library live with the CLI crate.

use skiff_core::{Interp, Ptr};

fn run(src: &str) -> String {
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    interp.load_str(src);
    interp.output_string()
}

fn run_rc(src: &str) -> (String, i32) {
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    let rc = interp.load_str(src);
    (interp.output_string(), rc)
}

#[test]
fn test_addition_stays_exact() {
    assert_eq!(run("(display (+ 1 2 3))"), "6");
}

#[test]
fn test_addition_promotes_to_real() {
    assert_eq!(run("(display (+ 1 2.0))"), "3.0");
}

#[test]
fn test_factorial() {
    let src = "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))
               (display (fact 10))";
    assert_eq!(run(src), "3628800");
}

#[test]
fn test_named_let() {
    let src = "(display (let loop ((i 0) (s 0)) (if (= i 10) s (loop (+ i 1) (+ s i)))))";
    assert_eq!(run(src), "45");
}

#[test]
fn test_promise_forced_once() {
    let src = "(define p (delay (begin (display \"x\") 42)))
               (display (force p))
               (display (force p))";
    assert_eq!(run(src), "x4242");
}

#[test]
fn test_forced_promise_is_identical() {
    let src = "(define p (delay (begin 1 \"payload\")))
               (display (eq? (force p) (force p)))";
    assert_eq!(run(src), "#t");
}

#[test]
fn test_call_cc_escapes() {
    let src = "(display (call-with-current-continuation (lambda (k) (+ 1 (k 10)))))";
    assert_eq!(run(src), "10");
}

#[test]
fn test_call_cc_reentry() {
    let src = "(define kk #f)
               (define n 0)
               (define (test) (+ 100 (call-with-current-continuation
                                       (lambda (k) (set! kk k) 0))))
               (display (test))
               (set! n (+ n 1))
               (if (< n 2) (kk 5))";
    assert_eq!(run(src), "100105");
}

#[test]
fn test_modulo_and_remainder_signs() {
    assert_eq!(run("(display (modulo 7 -3))"), "-2");
    assert_eq!(run("(display (remainder 7 -3))"), "1");
    assert_eq!(run("(display (modulo -7 3))"), "2");
    assert_eq!(run("(display (remainder -7 3))"), "-1");
    assert_eq!(run("(display (quotient 7 -3))"), "-2");
}

#[test]
fn test_division_by_zero_raises() {
    let (out, rc) = run_rc("(display (remainder 7 0))");
    assert!(out.contains("Error: remainder: division by zero"));
    assert_eq!(rc, -1);
    let (out, rc) = run_rc("(display (modulo 7 0))");
    assert!(out.contains("Error: modulo: division by zero"));
    assert_eq!(rc, -1);
}

#[test]
fn test_hex_escape_in_string() {
    assert_eq!(run("(display \"a \\x41; b\")"), "a A b");
    assert_eq!(run("(display \"\\x41\")"), "A");
}

#[test]
fn test_string_set_on_copy() {
    let src = "(define s (string-append \"abc\"))
               (string-set! s 1 #\\Z)
               (display s)";
    assert_eq!(run(src), "aZc");
}

#[test]
fn test_string_set_on_literal_raises() {
    let (out, rc) = run_rc("(string-set! \"abc\" 1 #\\Z)");
    assert!(out.contains("Error: string-set!: unable to alter immutable string:"));
    assert_eq!(rc, -1);
}

#[test]
fn test_symbols_are_eq() {
    assert_eq!(run("(display (eq? 'x 'x))"), "#t");
    assert_eq!(run("(display (eq? 'x 'y))"), "#f");
}

#[test]
fn test_eqv_distinguishes_exactness() {
    assert_eq!(run("(display (eqv? 1 1.0))"), "#f");
    assert_eq!(run("(display (eqv? 1 1))"), "#t");
    assert_eq!(run("(display (eqv? 1.5 1.5))"), "#t");
}

#[test]
fn test_write_escapes_display_does_not() {
    assert_eq!(run("(write \"a\\nb\")"), "\"a\\nb\"");
    assert_eq!(run("(display \"a\\nb\")"), "a\nb");
    assert_eq!(run("(write #\\a)"), "#\\a");
    assert_eq!(run("(display #\\a)"), "a");
}

#[test]
fn test_quote_abbreviations_print() {
    assert_eq!(run("(write ''a)"), "''a");
    assert_eq!(run("(write '(1 . 2))"), "(1 . 2)");
    assert_eq!(run("(write '(1 2 3))"), "(1 2 3)");
}

#[test]
fn test_vector_literals_and_ops() {
    assert_eq!(run("(write #(1 2 3))"), "#(1 2 3)");
    assert_eq!(run("(display (vector-ref #(a b c) 1))"), "b");
    let src = "(define v (make-vector 3 0))
               (vector-set! v 1 'x)
               (write v)";
    assert_eq!(run(src), "#(0 x 0)");
    assert_eq!(run("(display (vector-length (make-vector 17)))"), "17");
}

#[test]
fn test_vector_out_of_bounds_raises() {
    let (out, rc) = run_rc("(vector-ref #(1 2 3) 5)");
    assert!(out.contains("Error: vector-ref: out of bounds:"));
    assert_eq!(rc, -1);
}

#[test]
fn test_bytevectors() {
    let src = "(define bv (make-bytevector 4 7))
               (bytevector-u8-set! bv 2 255)
               (display (bytevector-u8-ref bv 2))
               (display \" \")
               (display (bytevector-length bv))";
    assert_eq!(run(src), "255 4");
}

#[test]
fn test_tail_calls_do_not_grow() {
    let src = "(define (count i) (if (= i 100000) i (count (+ i 1))))
               (display (count 0))";
    assert_eq!(run(src), "100000");
}

#[test]
fn test_gc_pressure_survives() {
    let src = "(define (churn i)
                 (if (= i 20000)
                     'ok
                     (begin (cons (make-string 10) (make-vector 4)) (churn (+ i 1)))))
               (display (churn 0))";
    assert_eq!(run(src), "ok");
}

#[test]
fn test_cond_with_arrow() {
    let src = "(display (cond ((assq 'b '((a 1) (b 2))) => car) (else 'none)))";
    assert_eq!(run(src), "b");
}

#[test]
fn test_case_dispatch() {
    let src = "(display (case (* 2 3) ((2 3 5 7) 'prime) ((1 4 6 8 9) 'composite)))";
    assert_eq!(run(src), "composite");
}

#[test]
fn test_let_star_and_letrec() {
    assert_eq!(
        run("(display (let* ((x 1) (y (+ x 1))) (* 10 y)))"),
        "20"
    );
    let src = "(display (letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
                                (odd? (lambda (n) (if (= n 0) #f (even? (- n 1))))))
                 (even? 88)))";
    assert_eq!(run(src), "#t");
}

#[test]
fn test_and_or_short_circuit() {
    assert_eq!(run("(display (and 1 2 3))"), "3");
    assert_eq!(run("(display (and 1 #f 3))"), "#f");
    assert_eq!(run("(display (or #f #f 7))"), "7");
    assert_eq!(run("(display (and))"), "#t");
    assert_eq!(run("(display (or))"), "#f");
}

#[test]
fn test_unbound_variable_raises() {
    let (out, rc) = run_rc("(display nonexistent-variable)");
    assert!(out.contains("Error: eval: unbound variable:"));
    assert_eq!(rc, -1);
}

#[test]
fn test_set_unbound_raises() {
    let (out, rc) = run_rc("(set! nowhere 1)");
    assert!(out.contains("Error: set!: unbound variable:"));
    assert_eq!(rc, -1);
}

#[test]
fn test_user_error() {
    let (out, rc) = run_rc("(error \"boom\" 42)");
    assert!(out.contains("Error: boom 42"));
    assert_eq!(rc, -1);
}

#[test]
fn test_error_hook_intercepts() {
    let src = "(define *error-hook* (lambda args (display \"caught!\") (quit 0)))
               (car 'not-a-pair)";
    let (out, _) = run_rc(src);
    assert!(out.contains("caught!"));
}

#[test]
fn test_arity_violation_message() {
    let (out, rc) = run_rc("(car)");
    assert!(out.contains("Error: car: needs 1 argument(s)"));
    assert_eq!(rc, -1);
}

#[test]
fn test_type_violation_message() {
    let (out, rc) = run_rc("(car 5)");
    assert!(out.contains("Error: car: argument 1 must be: pair"));
    assert_eq!(rc, -1);
}

#[test]
fn test_unbalanced_input_sets_retcode() {
    let (_, rc) = run_rc("(+ 1 2");
    assert_eq!(rc, 1);
}

#[test]
fn test_length_rejects_dotted() {
    let (out, rc) = run_rc("(length '(1 2 . 3))");
    assert!(out.contains("Error: length: not a list:"));
    assert_eq!(rc, -1);
    assert_eq!(run("(display (length '(1 2 3)))"), "3");
    assert_eq!(run("(display (length '()))"), "0");
}

#[test]
fn test_list_predicate_on_cycle() {
    let src = "(define l (cons 1 (cons 2 '())))
               (set-cdr! (cdr l) l)
               (display (list? l))";
    assert_eq!(run(src), "#f");
}

#[test]
fn test_append_and_reverse() {
    assert_eq!(run("(write (append '(1 2) '(3) '() '(4)))"), "(1 2 3 4)");
    assert_eq!(run("(write (append '() 'a))"), "a");
    assert_eq!(run("(write (reverse '(1 2 3)))"), "(3 2 1)");
    assert_eq!(run("(write (list* 1 2 '(3 4)))"), "(1 2 3 4)");
}

#[test]
fn test_macro_form() {
    let src = "(define (list . x) x)
               (define (cadr x) (car (cdr x)))
               (define (caddr x) (car (cdr (cdr x))))
               (macro (swap! form)
                 (list 'let (list (list 'tmp (cadr form)))
                       (list 'set! (cadr form) (caddr form))
                       (list 'set! (caddr form) 'tmp)))
               (define a 1)
               (define b 2)
               (swap! a b)
               (display (list a b))";
    assert_eq!(run(src), "(2 1)");
}

#[test]
fn test_string_ports() {
    let src = "(define p (open-input-string \"(1 2 3) four\"))
               (write (read p))
               (display \" \")
               (write (read p))";
    assert_eq!(run(src), "(1 2 3) four");
}

#[test]
fn test_output_string_port() {
    let src = "(define p (open-output-string))
               (write '(a b) p)
               (display (get-output-string p))";
    assert_eq!(run(src), "(a b)");
}

#[test]
fn test_read_char_and_peek() {
    let src = "(define p (open-input-string \"ab\"))
               (display (peek-char p))
               (display (read-char p))
               (display (read-char p))
               (display (eof-object? (read-char p)))";
    assert_eq!(run(src), "aab#t");
}

#[test]
fn test_read_u8_raw_bytes() {
    // A two-byte UTF-8 character comes back byte at a time through
    // read-u8, but as one code point through read-char.
    let src = "(define p (open-input-string \"\u{e9}\"))
               (display (read-u8 p))
               (display \" \")
               (display (peek-u8 p))";
    assert_eq!(run(src), "195 169");
    let src = "(define p (open-input-string \"\u{e9}\"))
               (display (char->integer (read-char p)))";
    assert_eq!(run(src), "233");
}

#[test]
fn test_char_literals() {
    assert_eq!(run("(display (char->integer #\\A))"), "65");
    assert_eq!(run("(display (char->integer #\\space))"), "32");
    assert_eq!(run("(display (char->integer #\\x3bb))"), "955");
    assert_eq!(run("(display (integer->char 90))"), "Z");
}

#[test]
fn test_integer_to_char_range_check() {
    let (out, rc) = run_rc("(integer->char 1114200)");
    assert!(out.contains("Error: integer->char: value out of range:"));
    assert_eq!(rc, -1);
}

#[test]
fn test_numeric_literals() {
    assert_eq!(run("(display #x10)"), "16");
    assert_eq!(run("(display #b101)"), "5");
    assert_eq!(run("(display #o17)"), "15");
    assert_eq!(run("(display #d42)"), "42");
    assert_eq!(run("(display 1e3)"), "1000.0");
    assert_eq!(run("(display .5)"), "0.5");
    assert_eq!(run("(display +inf.0)"), "+inf");
    assert_eq!(run("(display -inf.0)"), "-inf");
    assert_eq!(run("(display +nan.0)"), "+nan");
}

#[test]
fn test_atom_string_conversions() {
    assert_eq!(run("(display (atom->string 255 16))"), "FF");
    assert_eq!(run("(display (string->atom \"ff\" 16))"), "255");
    assert_eq!(run("(display (string->atom \"12\"))"), "12");
    assert_eq!(run("(display (symbol->string 'abc))"), "abc");
    assert_eq!(run("(display (string->symbol \"abc\"))"), "abc");
}

#[test]
fn test_property_lists() {
    let src = "(put 'color 'kind 'warm)
               (display (get 'color 'kind))
               (display (get 'color 'missing))";
    assert_eq!(run(src), "warm()");
}

#[test]
fn test_defined_predicate() {
    assert_eq!(run("(display (defined? 'car))"), "#t");
    assert_eq!(run("(display (defined? 'no-such-thing))"), "#f");
}

#[test]
fn test_gensym_is_fresh() {
    assert_eq!(run("(display (eq? (gensym) (gensym)))"), "#f");
}

#[test]
fn test_substring_and_append_wide() {
    assert_eq!(run("(display (substring \"hello\" 1 3))"), "el");
    assert_eq!(run("(display (string-length \"\u{3BB}x\"))"), "2");
    let src = "(display (string-append \"a\" \"\u{3BB}\" \"b\"))";
    assert_eq!(run(src), "a\u{3BB}b");
}

#[test]
fn test_make_string_fill() {
    assert_eq!(run("(display (make-string 3 #\\z))"), "zzz");
    assert_eq!(run("(display (string-length (make-string 4)))"), "4");
}

#[test]
fn test_expt_exactness() {
    assert_eq!(run("(display (expt 2 10))"), "1024");
    assert_eq!(run("(display (expt 2.0 2))"), "4.0");
    assert_eq!(run("(display (expt 2 -1))"), "0.5");
}

#[test]
fn test_number_comparisons_chain() {
    assert_eq!(run("(display (< 1 2 3))"), "#t");
    assert_eq!(run("(display (< 1 3 2))"), "#f");
    assert_eq!(run("(display (= 2 2 2))"), "#t");
    assert_eq!(run("(display (>= 3 3 2))"), "#t");
}

#[test]
fn test_eval_and_apply_primitives() {
    assert_eq!(run("(display (eval '(+ 1 2)))"), "3");
    assert_eq!(run("(display (apply + 1 '(2 3)))"), "6");
    assert_eq!(run("(display (apply + '(1 2 3)))"), "6");
}

#[test]
fn test_nested_host_eval() {
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    interp.load_str("(define (twice f x) (f (f x)))");

    fn host_helper(interp: &mut Interp, args: Ptr) -> Ptr {
        // Re-enter the evaluator from inside a foreign call.
        let n = interp.ivalue(interp.car(args));
        let expr = {
            let plus = interp.mk_symbol("+");
            let a = interp.mk_integer(n);
            let b = interp.mk_integer(10);
            let tail = interp.cons(b, Ptr::NIL);
            let tail = interp.cons(a, tail);
            interp.cons(plus, tail)
        };
        interp.eval(expr)
    }
    interp.register_foreign("add-ten", host_helper);
    interp.load_str("(display (twice add-ten 1))");
    assert_eq!(interp.output_string(), "21");
}

#[test]
fn test_host_call_interface() {
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    interp.load_str("(define (double x) (* 2 x))");
    let f = {
        let sym = interp.mk_symbol("double");
        interp.eval(sym)
    };
    let args = {
        let n = interp.mk_integer(21);
        interp.cons(n, Ptr::NIL)
    };
    let r = interp.call(f, args);
    assert_eq!(interp.ivalue(r), 42);
}

#[test]
fn test_load_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.scm");
    std::fs::write(&path, "(define loaded-value 99)\n(display loaded-value)\n").unwrap();
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    let rc = interp.load_path(&path).unwrap();
    assert_eq!(rc, 0);
    assert_eq!(interp.output_string(), "99");
}

#[test]
fn test_load_missing_file_is_host_error() {
    let mut interp = Interp::new().unwrap();
    assert!(interp
        .load_path(std::path::Path::new("/no/such/file.scm"))
        .is_err());
}

#[test]
fn test_error_in_loaded_file_names_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.scm");
    std::fs::write(&path, "(define x 1)\n(car 5)\n").unwrap();
    let mut interp = Interp::new().unwrap();
    interp.set_output_string();
    let rc = interp.load_path(&path).unwrap();
    assert_eq!(rc, -1);
    let out = interp.output_string();
    assert!(out.contains("bad.scm"), "missing file name in: {}", out);
    assert!(out.contains("Error:"));
}

#[test]
fn test_reader_roundtrip() {
    let forms = [
        "(1 2 3)",
        "(a . b)",
        "#(1 #\\x \"s\")",
        "(quote (1 2))",
        "(1 (2 (3 (4))))",
        "()",
    ];
    for form in forms {
        let src = format!("(write (read (open-input-string {:?})))", form);
        let printed = run(&src);
        let src2 = format!("(write (read (open-input-string {:?})))", printed);
        assert_eq!(printed, run(&src2), "round-trip failed for {}", form);
    }
}

#[test]
fn test_shebang_line_ignored() {
    assert_eq!(run("#! /usr/bin/skiff\n(display 'ran)"), "ran");
}

#[test]
fn test_quit_sets_retcode() {
    let (_, rc) = run_rc("(quit 3)");
    assert_eq!(rc, 3);
    let (_, rc) = run_rc("(quit)");
    assert_eq!(rc, 0);
}

#[test]
fn test_gc_primitive_runs() {
    assert_eq!(run("(gc) (display 'after-gc)"), "after-gc");
}

#[test]
fn test_gc_verbose_reports() {
    let (out, _) = run_rc("(gc-verbose #t) (gc) (display 'done)");
    assert!(out.contains("gc..."));
    assert!(out.contains("cells were recovered"));
    assert!(out.contains("done"));
}

#[test]
fn test_current_environment_and_eval() {
    let src = "(define (probe-in env) (eval 'hidden env))
               (define (outer) (let ((hidden 42)) (probe-in (current-environment))))
               (display (outer))";
    assert_eq!(run(src), "42");
}

#[test]
fn test_closure_rest_args() {
    let src = "(define (rest . xs) xs)
               (write (rest 1 2 3))";
    assert_eq!(run(src), "(1 2 3)");
    let src = "(define (one-more a . xs) (cons a xs))
               (write (one-more 1 2 3))";
    assert_eq!(run(src), "(1 2 3)");
}

#[test]
fn test_not_enough_arguments_raises() {
    let (out, rc) = run_rc("((lambda (a b) a) 1)");
    assert!(out.contains("Error: not enough arguments"));
    assert_eq!(rc, -1);
}

#[test]
fn test_make_closure_and_get_closure_code() {
    let src = "(define f (make-closure '((x) (* x x))))
               (display (f 9))";
    assert_eq!(run(src), "81");
    let src = "(define (g y) (+ y 1))
               (write (get-closure-code g))";
    assert_eq!(run(src), "(lambda (y) (+ y 1))");
}
