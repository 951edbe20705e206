//! Runtime configuration (spec.md §6.3): environment-variable hints plus GC
//! tuning knobs, collected once at bootstrap so neither engine has to probe
//! the environment itself mid-run.

use std::path::PathBuf;

/// Default GC trigger threshold, mirrored from `gc.rs`'s own constant so a
/// `Config` can override it before `Env`/`Gc` are constructed.
const DEFAULT_GC_THRESHOLD: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct Config {
    /// `CLJW_CACHE`: directory holding compiled Module files, keyed by
    /// namespace (spec.md §6.4). `None` disables the cache.
    pub cache_dir: Option<PathBuf>,
    /// `CLJW_PRINT_LENGTH`: `*print-length*` default.
    pub print_length: Option<usize>,
    /// `CLJW_PRINT_LEVEL`: `*print-level*` default.
    pub print_level: Option<usize>,
    /// Initial GC byte threshold before the first collection.
    pub gc_initial_threshold: usize,
    /// Multiplier applied to the live-byte count to compute the next
    /// threshold after each collection (spec.md §4.R.2: "ratcheting policy").
    pub gc_growth_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: dirs::cache_dir().map(|d| d.join("clojurewasm")),
            print_length: None,
            print_level: None,
            gc_initial_threshold: DEFAULT_GC_THRESHOLD,
            gc_growth_ratio: 2.0,
        }
    }
}

impl Config {
    /// Read `CLJW_CACHE`/`CLJW_PRINT_LENGTH`/`CLJW_PRINT_LEVEL` from the
    /// process environment, falling back to defaults for anything absent or
    /// unparseable (spec.md §6.3: "all are hints; absence is well-defined").
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(dir) = std::env::var("CLJW_CACHE") {
            cfg.cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(n) = std::env::var("CLJW_PRINT_LENGTH") {
            cfg.print_length = n.parse().ok();
        }
        if let Ok(n) = std::env::var("CLJW_PRINT_LEVEL") {
            cfg.print_level = n.parse().ok();
        }
        tracing::debug!(?cfg.cache_dir, ?cfg.print_length, ?cfg.print_level, "config loaded from environment");
        cfg
    }

    pub fn print_opts(&self) -> crate::printer::PrintOpts {
        crate::printer::PrintOpts {
            length: self.print_length,
            level: self.print_level,
            readable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_print_bound_but_do_have_a_gc_threshold() {
        let cfg = Config::default();
        assert!(cfg.print_length.is_none());
        assert!(cfg.print_level.is_none());
        assert_eq!(cfg.gc_initial_threshold, DEFAULT_GC_THRESHOLD);
    }
}
