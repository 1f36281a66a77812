//! Locating the xtb executable.
//!
//! An [`ExecutableResolver`] is built once (typically from
//! [`SettingsManager`](crate::settings::SettingsManager)) and handed to the
//! [`JobRunner`](crate::runner::JobRunner). It never changes after
//! construction and keeps no cache; each [`resolve`](ExecutableResolver::resolve)
//! call looks at the filesystem again.
//!
//! Lookup order:
//!
//! 1. every directory on the search path (`PATH` unless overridden)
//! 2. the manually configured override, which may be the executable itself or
//!    the folder containing it

use log::debug;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The executable could not be found on the search path or at the override.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{program} executable not found on PATH{}", override_hint(.override_path))]
pub struct ExecutableNotFound {
    /// Program name that was looked up
    pub program: String,
    /// Manual override that was also checked, if any
    pub override_path: Option<PathBuf>,
}

fn override_hint(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" or at configured path {}", p.display()),
        None => ". Install xtb or set [executable] path in xtbrun_config.cfg".to_string(),
    }
}

/// Resolves the path of the program to run.
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    program: String,
    override_path: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl ExecutableResolver {
    /// Resolver for `program`, using `PATH` and an optional manual override.
    ///
    /// # Examples
    ///
    /// ```
    /// use xtbrun::executable::ExecutableResolver;
    ///
    /// let resolver = ExecutableResolver::new("xtb", Some("/opt/xtb/bin".into()));
    /// assert_eq!(resolver.program(), "xtb");
    /// ```
    pub fn new(program: impl Into<String>, override_path: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            override_path,
            search_path: None,
        }
    }

    /// Replaces the search path (default: the `PATH` environment variable).
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Program name being resolved.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Manual override, if configured.
    pub fn override_path(&self) -> Option<&Path> {
        self.override_path.as_deref()
    }

    /// Finds the executable, checking the search path before the override.
    pub fn resolve(&self) -> Result<PathBuf, ExecutableNotFound> {
        if let Some(found) = self.search() {
            debug!("Found {} on search path: {}", self.program, found.display());
            return Ok(found);
        }
        debug!("{} not found on search path", self.program);

        if let Some(override_path) = &self.override_path {
            let candidate = if override_path.is_dir() {
                override_path.join(&self.program)
            } else {
                override_path.clone()
            };
            if is_executable(&candidate) {
                debug!("Using configured {}: {}", self.program, candidate.display());
                return Ok(candidate);
            }
            debug!("Configured path is not executable: {}", candidate.display());
        }

        Err(ExecutableNotFound {
            program: self.program.clone(),
            override_path: self.override_path.clone(),
        })
    }

    fn search(&self) -> Option<PathBuf> {
        let paths = match &self.search_path {
            Some(p) => p.clone(),
            None => env::var_os("PATH")?,
        };
        env::split_paths(&paths)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(&self.program))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
