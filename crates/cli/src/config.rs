//! Environment-variable configuration
//!
//! The kernel never reads the process environment; everything configurable
//! is collected here at startup and passed in as a `Config`.
//!
//! - `CELL_SEGSIZE`   cells per heap segment
//! - `CELL_NSEGMENT`  maximum number of segments
//! - `EVAL_LIMIT`     hard evaluation step budget (process exits 7 past it)

use skiff_core::Config;

pub fn config_from_env() -> Config {
    let mut config = Config::default();
    if let Some(n) = read_var("CELL_SEGSIZE") {
        config.segment_size = n as u32;
    }
    if let Some(n) = read_var("CELL_NSEGMENT") {
        config.max_segments = n as usize;
    }
    if let Some(n) = read_var("EVAL_LIMIT") {
        config.step_limit = Some(n);
    }
    config
}

fn read_var(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(v) => match v.parse::<u64>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                eprintln!("Ignoring invalid {}={}", name, v);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        std::env::remove_var("CELL_SEGSIZE");
        std::env::remove_var("CELL_NSEGMENT");
        std::env::remove_var("EVAL_LIMIT");
        let c = config_from_env();
        assert_eq!(c.segment_size, skiff_core::interp::DEFAULT_SEGMENT_SIZE);
        assert_eq!(c.max_segments, skiff_core::interp::DEFAULT_MAX_SEGMENTS);
        assert!(c.step_limit.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("CELL_SEGSIZE", "9000");
        std::env::set_var("CELL_NSEGMENT", "20");
        std::env::set_var("EVAL_LIMIT", "123456");
        let c = config_from_env();
        assert_eq!(c.segment_size, 9000);
        assert_eq!(c.max_segments, 20);
        assert_eq!(c.step_limit, Some(123456));
        std::env::remove_var("CELL_SEGSIZE");
        std::env::remove_var("CELL_NSEGMENT");
        std::env::remove_var("EVAL_LIMIT");
    }

    #[test]
    #[serial]
    fn test_garbage_values_are_ignored() {
        std::env::set_var("CELL_SEGSIZE", "not-a-number");
        std::env::set_var("EVAL_LIMIT", "0");
        let c = config_from_env();
        assert_eq!(c.segment_size, skiff_core::interp::DEFAULT_SEGMENT_SIZE);
        assert!(c.step_limit.is_none());
        std::env::remove_var("CELL_SEGSIZE");
        std::env::remove_var("EVAL_LIMIT");
    }
}
