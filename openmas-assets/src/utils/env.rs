//! Scoped mutation of process environment variables.

use std::ffi::OsString;

use log::debug;

/// Sets or removes an environment variable and puts the previous value
/// (or its absence) back when dropped.
///
/// The environment is process-global: callers mutating the same variable
/// from several threads must serialize those calls themselves.
#[derive(Debug)]
#[must_use = "the variable is restored as soon as the guard is dropped"]
pub struct ScopedEnvVar {
    key: String,
    original: Option<OsString>,
}

impl ScopedEnvVar {
    pub fn set(key: impl Into<String>, value: &str) -> Self {
        let guard = Self::capture(key.into());
        std::env::set_var(&guard.key, value);
        guard
    }

    pub fn remove(key: impl Into<String>) -> Self {
        let guard = Self::capture(key.into());
        std::env::remove_var(&guard.key);
        guard
    }

    fn capture(key: String) -> Self {
        let original = std::env::var_os(&key);
        Self { key, original }
    }
}

impl Drop for ScopedEnvVar {
    fn drop(&mut self) {
        match self.original.take() {
            Some(value) => std::env::set_var(&self.key, value),
            None => std::env::remove_var(&self.key),
        }
        debug!("Restored environment variable {}", self.key);
    }
}
