//! skiff - a small embeddable Scheme for build scripting
//!
//! Loads the init library, then each named source file in order, then an
//! optional script or expression string with `*args*` bound, and finally
//! drops into the REPL when nothing else was asked for.

use std::path::Path;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skiff_core::{Interp, Ptr};

mod config;
mod stdlib;
mod subprocess;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scheme interpreter for build scripts", long_about = None)]
struct Cli {
    /// Source files to load in order; `-` reads an interactive session
    /// from stdin
    files: Vec<String>,

    /// Evaluate an expression string after the files
    #[arg(short = 'c', long = "eval", value_name = "EXPRS")]
    eval: Option<String>,

    /// Load a script file with the remaining arguments bound to *args*
    #[arg(short = '1', long = "script", value_name = "FILE")]
    script: Option<String>,

    /// Arguments exposed to the script or expression as *args*
    #[arg(last = true, value_name = "ARGS")]
    script_args: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SKIFF_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut interp = match Interp::with_config(config::config_from_env()) {
        Ok(interp) => interp,
        Err(e) => {
            eprintln!("Could not initialize: {}", e);
            process::exit(2);
        }
    };
    interp.set_input_stdin();
    interp.set_output_stdout();
    interp.register_foreign("cmd", subprocess::cmd_subprocess);

    if stdlib::load_init(&mut interp) != 0 {
        eprintln!("Errors encountered loading the init library");
        process::exit(2);
    }

    let mut retcode = 0;
    let mut ran_anything = false;

    for file in &cli.files {
        ran_anything = true;
        if file == "-" {
            retcode = interp.run_repl();
            continue;
        }
        match interp.load_path(Path::new(file)) {
            Ok(rc) => {
                retcode = rc;
                if rc != 0 {
                    eprintln!("Errors encountered reading {}", file);
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                retcode = 1;
            }
        }
    }

    if cli.script.is_some() || cli.eval.is_some() {
        ran_anything = true;
        define_args(&mut interp, &cli.script_args);
    }

    if let Some(script) = &cli.script {
        match interp.load_path(Path::new(script)) {
            Ok(rc) => {
                retcode = rc;
                if rc != 0 {
                    eprintln!("Errors encountered reading {}", script);
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                retcode = 1;
            }
        }
    }

    if let Some(exprs) = &cli.eval {
        retcode = interp.load_str(exprs);
    }

    if !ran_anything {
        println!("skiff {}", env!("CARGO_PKG_VERSION"));
        retcode = interp.run_repl();
    }

    process::exit(exit_code(retcode));
}

/// Bind the trailing CLI arguments as a list of strings named *args*.
fn define_args(interp: &mut Interp, script_args: &[String]) {
    let mut list = Ptr::NIL;
    for a in script_args.iter().rev() {
        let s = interp.mk_string(a);
        list = interp.cons(s, list);
    }
    let sym = interp.mk_symbol("*args*");
    let env = interp.global_env();
    interp.define(env, sym, list);
}

/// 0 success, 9 out of memory, 1 for reader or evaluator errors. Step
/// budget overruns exit 7 from inside the evaluator.
fn exit_code(retcode: i32) -> i32 {
    match retcode {
        0 => 0,
        9 => 9,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(0), 0);
        assert_eq!(exit_code(-1), 1);
        assert_eq!(exit_code(1), 1);
        assert_eq!(exit_code(9), 9);
    }

    #[test]
    fn test_define_args_builds_string_list() {
        let mut interp = Interp::new().unwrap();
        define_args(
            &mut interp,
            &["a".to_string(), "b".to_string(), "c".to_string()],
        );
        interp.set_output_string();
        interp.load_str("(display *args*)");
        assert_eq!(interp.output_string(), "(a b c)");
    }
}
