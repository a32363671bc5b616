//! Process-level tests for the skiff binary.

use std::process::{Command, Output};

fn skiff() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skiff"))
}

fn run_eval(expr: &str) -> Output {
    skiff().arg("-c").arg(expr).output().expect("spawn skiff")
}

fn stdout_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn test_eval_expression() {
    let out = run_eval("(display (+ 1 2 3))");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "6");
}

#[test]
fn test_error_exits_nonzero() {
    let out = run_eval("(car 5)");
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout_of(&out).contains("Error: car: argument 1 must be: pair"));
}

#[test]
fn test_quasiquote_from_init_library() {
    let out = run_eval("(write `(1 ,(+ 1 1) ,@(list 3 4)))");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "(1 2 3 4)");
}

#[test]
fn test_map_and_equal_from_init_library() {
    let out = run_eval("(display (equal? (map + '(1 2) '(3 4)) '(4 6)))");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "#t");
}

#[test]
fn test_string_copy_then_set() {
    let out = run_eval("(display (string-set! (string-copy \"abc\") 1 #\\Z))");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "aZc");
}

#[test]
fn test_when_unless() {
    let out = run_eval("(when (> 2 1) (display 'yes)) (unless (> 2 1) (display 'no))");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "yes");
}

#[test]
fn test_cons_stream_head_tail() {
    let out = run_eval(
        "(define s (cons-stream 1 (cons-stream 2 '())))
         (display (head s))
         (display (head (tail s)))",
    );
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "12");
}

#[test]
fn test_args_binding() {
    let out = skiff()
        .arg("-c")
        .arg("(display *args*)")
        .arg("--")
        .arg("a")
        .arg("b")
        .output()
        .expect("spawn skiff");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "(a b)");
}

#[test]
fn test_load_file_argument() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.scm");
    std::fs::write(&path, "(display (let loop ((i 0) (s 0)) (if (= i 10) s (loop (+ i 1) (+ s i)))))").unwrap();
    let out = skiff().arg(&path).output().expect("spawn skiff");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "45");
}

#[test]
fn test_script_with_args() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.scm");
    std::fs::write(&path, "(for-each display *args*)").unwrap();
    let out = skiff()
        .arg("--script")
        .arg(&path)
        .arg("--")
        .arg("x")
        .arg("y")
        .output()
        .expect("spawn skiff");
    assert!(out.status.success());
    assert_eq!(stdout_of(&out), "xy");
}

#[test]
fn test_eval_limit_exits_seven() {
    let out = skiff()
        .env("EVAL_LIMIT", "100000")
        .arg("-c")
        .arg("(define (spin) (spin)) (spin)")
        .output()
        .expect("spawn skiff");
    assert_eq!(out.status.code(), Some(7));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Eval steps limit reached"));
}

#[test]
#[cfg(unix)]
fn test_cmd_spawns_process() {
    let out = run_eval("(display (cmd \"true\"))");
    assert!(out.status.success());
    let text = stdout_of(&out);
    // Echoed command line, then the exit status.
    assert!(text.contains("true"));
    assert!(text.ends_with('0'));
}

#[test]
fn test_quit_code_propagates() {
    let out = run_eval("(quit 0)");
    assert_eq!(out.status.code(), Some(0));
    let out = run_eval("(quit 5)");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_version_flag() {
    let out = skiff().arg("--version").output().expect("spawn skiff");
    assert!(out.status.success());
    assert!(stdout_of(&out).starts_with("skiff"));
}
