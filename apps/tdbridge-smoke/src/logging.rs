//! Tracing bootstrap for the smoke binary.
//!
//! The smoke run is mostly about watching the delivery thread and the
//! handler workers interleave, so thread names are always printed.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tdbridge_client=debug,tdbridge_core=debug";

/// Checked in order; the first non-blank value that parses wins.
const FILTER_KEYS: [&str; 3] = ["RUST_LOG", "TDBRIDGE_SMOKE_LOG", "TDBRIDGE_LOG"];

pub fn init() {
    let (filter, source) = resolve_filter(|key| env::var(key).ok());
    let installed = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(source, "smoke logging ready");
    }
}

/// Pick the filter and report which variable it came from.
fn resolve_filter<F>(lookup: F) -> (EnvFilter, &'static str)
where
    F: Fn(&str) -> Option<String>,
{
    for key in FILTER_KEYS {
        let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        match EnvFilter::try_new(&value) {
            Ok(filter) => return (filter, key),
            Err(err) => eprintln!("ignoring {key}={value}: {err}"),
        }
    }
    (EnvFilter::new(DEFAULT_FILTER), "default")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(pairs: &[(&str, &str)]) -> (String, &'static str) {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        let (filter, source) = resolve_filter(|key| vars.get(key).cloned());
        (filter.to_string(), source)
    }

    #[test]
    fn default_when_nothing_is_set() {
        let (_, source) = resolve(&[]);
        assert_eq!(source, "default");
    }

    #[test]
    fn smoke_variable_beats_shared_one() {
        let (filter, source) = resolve(&[("TDBRIDGE_SMOKE_LOG", "warn"), ("TDBRIDGE_LOG", "trace")]);
        assert_eq!(source, "TDBRIDGE_SMOKE_LOG");
        assert_eq!(filter, "warn");
    }

    #[test]
    fn rust_log_wins_over_everything() {
        let (_, source) = resolve(&[("RUST_LOG", "error"), ("TDBRIDGE_SMOKE_LOG", "warn")]);
        assert_eq!(source, "RUST_LOG");
    }

    #[test]
    fn blank_values_are_skipped() {
        let (filter, source) = resolve(&[("RUST_LOG", "  "), ("TDBRIDGE_LOG", "debug")]);
        assert_eq!(source, "TDBRIDGE_LOG");
        assert_eq!(filter, "debug");
    }
}
