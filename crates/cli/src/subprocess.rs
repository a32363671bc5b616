//! The `cmd` primitive
//!
//! Spawns an external process with inherited stdio and waits for it. The
//! command line is echoed first so build logs show what ran. Scheme sees
//! the child's exit status as an integer, or -1 when the spawn failed or
//! the child died on a signal.

use std::process::Command;

use skiff_core::{Interp, Ptr};

pub fn cmd_subprocess(interp: &mut Interp, args: Ptr) -> Ptr {
    let mut argv: Vec<String> = Vec::new();
    let mut p = args;
    while interp.is_pair(p) {
        let a = interp.car(p);
        if !interp.is_string(a) {
            return Ptr::F;
        }
        argv.push(interp.string_value(a));
        p = interp.cdr(p);
    }
    if argv.is_empty() {
        return Ptr::F;
    }

    for a in &argv {
        print!("{} ", a);
    }
    println!();

    let result = run_subprocess(&argv);
    interp.mk_integer(result as i64)
}

fn run_subprocess(argv: &[String]) -> i32 {
    match Command::new(&argv[0]).args(&argv[1..]).status() {
        Ok(status) => match status.code() {
            Some(code) => code,
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(sig) = status.signal() {
                        eprintln!("Program interrupted by signal {}.", sig);
                    }
                }
                -1
            }
        },
        Err(e) => {
            eprintln!("Could not exec child process {}: {}", argv[0], e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of_strings(interp: &mut Interp, items: &[&str]) -> Ptr {
        let mut l = Ptr::NIL;
        for s in items.iter().rev() {
            let cell = interp.mk_string(s);
            l = interp.cons(cell, l);
        }
        l
    }

    #[test]
    fn test_no_arguments_is_false() {
        let mut interp = Interp::new().unwrap();
        assert_eq!(cmd_subprocess(&mut interp, Ptr::NIL), Ptr::F);
    }

    #[test]
    fn test_non_string_argument_is_false() {
        let mut interp = Interp::new().unwrap();
        let n = interp.mk_integer(1);
        let l = interp.cons(n, Ptr::NIL);
        assert_eq!(cmd_subprocess(&mut interp, l), Ptr::F);
    }

    #[test]
    #[cfg(unix)]
    fn test_exit_status_is_reported() {
        let mut interp = Interp::new().unwrap();
        let l = list_of_strings(&mut interp, &["true"]);
        let r = cmd_subprocess(&mut interp, l);
        assert_eq!(interp.ivalue(r), 0);

        let l = list_of_strings(&mut interp, &["false"]);
        let r = cmd_subprocess(&mut interp, l);
        assert_eq!(interp.ivalue(r), 1);
    }

    #[test]
    fn test_missing_program_is_minus_one() {
        let mut interp = Interp::new().unwrap();
        let l = list_of_strings(&mut interp, &["definitely-not-a-real-binary-xyzzy"]);
        let r = cmd_subprocess(&mut interp, l);
        assert_eq!(interp.ivalue(r), -1);
    }
}
