//! Embedded init library
//!
//! The init library is compiled into the binary so the interpreter is
//! self-contained; `SKIFF_INIT` names an on-disk replacement for hacking on
//! the library without rebuilding.

use std::path::Path;

use skiff_core::Interp;
use tracing::warn;

pub static INIT_SCM: &str = include_str!("../stdlib/init.scm");

/// Load the init library, honoring a `SKIFF_INIT` override. Returns the
/// interpreter's return code for the load.
pub fn load_init(interp: &mut Interp) -> i32 {
    if let Ok(path) = std::env::var("SKIFF_INIT") {
        match interp.load_path(Path::new(&path)) {
            Ok(rc) => return rc,
            Err(e) => {
                warn!("{}; falling back to the embedded init library", e);
            }
        }
    }
    interp.load_str(INIT_SCM)
}
