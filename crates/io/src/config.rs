//! Settings read from the environment of the instrumented process.

use std::ffi::OsString;
use std::path::PathBuf;

use libc::c_int;
use thiserror::Error;

/// Descriptor of an already-open pipe or file that records go to.
pub const ENV_FD: &str = "ENV_DUMP_FD";
/// Log file path, opened once in append mode.  `stderr` selects fd 2.
pub const ENV_FILE: &str = "ENV_DUMP_FILE";
/// `tracing` filter directives for the library's own diagnostics.
pub const ENV_TRACE: &str = "ENV_DUMP_TRACE";
/// Start with tracking suppressed.
pub const ENV_IGNORE: &str = "ENV_DUMP_IGNORE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a file descriptor number")]
    InvalidFd { var: &'static str, value: String },
}

/// Where log records are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Stderr,
    Fd(c_int),
    File(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub output: Output,
    pub trace: Option<String>,
    pub ignore: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var_os(var))
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// `ENV_DUMP_FD` wins over `ENV_DUMP_FILE` when both are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let output = if let Some(raw) = lookup(ENV_FD) {
            let value = raw.to_string_lossy();
            match value.trim().parse::<c_int>() {
                Ok(fd) if fd >= 0 => Output::Fd(fd),
                _ => {
                    return Err(ConfigError::InvalidFd {
                        var: ENV_FD,
                        value: value.into_owned(),
                    })
                }
            }
        } else {
            match lookup(ENV_FILE) {
                Some(path) if path.is_empty() || path == "stderr" => Output::Stderr,
                Some(path) => Output::File(PathBuf::from(path)),
                None => Output::Stderr,
            }
        };

        let trace = lookup(ENV_TRACE)
            .map(|v| v.to_string_lossy().into_owned())
            .filter(|v| !v.is_empty());

        let ignore = lookup(ENV_IGNORE).is_some_and(|v| {
            matches!(
                v.to_string_lossy().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )
        });

        Ok(Config {
            output,
            trace,
            ignore,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_to_stderr() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.output, Output::Stderr);
    }

    #[test]
    fn file_output() {
        let config = Config::from_lookup(lookup(&[(ENV_FILE, "/tmp/run1.env_dump")])).unwrap();
        assert_eq!(config.output, Output::File(PathBuf::from("/tmp/run1.env_dump")));

        let config = Config::from_lookup(lookup(&[(ENV_FILE, "stderr")])).unwrap();
        assert_eq!(config.output, Output::Stderr);
    }

    #[test]
    fn fd_takes_precedence() {
        let config = Config::from_lookup(lookup(&[
            (ENV_FD, " 9 "),
            (ENV_FILE, "/tmp/ignored"),
        ]))
        .unwrap();
        assert_eq!(config.output, Output::Fd(9));
    }

    #[test]
    fn bad_fd_is_an_error() {
        for bad in ["pipe", "-3", ""] {
            let err = Config::from_lookup(lookup(&[(ENV_FD, bad)])).unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidFd {
                    var: ENV_FD,
                    value: bad.to_string()
                }
            );
        }
    }

    #[test]
    fn trace_and_ignore() {
        let config = Config::from_lookup(lookup(&[
            (ENV_TRACE, "env_dump_fd=trace"),
            (ENV_IGNORE, "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.trace.as_deref(), Some("env_dump_fd=trace"));
        assert!(config.ignore);

        let config = Config::from_lookup(lookup(&[(ENV_TRACE, ""), (ENV_IGNORE, "0")])).unwrap();
        assert_eq!(config.trace, None);
        assert!(!config.ignore);
    }
}
