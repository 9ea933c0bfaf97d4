/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Process environment and file system shims
//!
//! Every component reads environment variables and files through these handles
//! instead of `std::env`/`std::fs` directly so that tests can run against a
//! fully synthetic environment without mutating process-global state.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle for reading process environment variables
#[derive(Clone, Debug, Default)]
pub struct Env(EnvInner);

#[derive(Clone, Debug, Default)]
enum EnvInner {
    #[default]
    Real,
    Fake(Arc<HashMap<String, String>>),
}

impl Env {
    /// An `Env` backed by the real process environment
    pub fn real() -> Self {
        Env(EnvInner::Real)
    }

    /// A fake `Env` containing exactly the given variables
    pub fn from_slice(vars: &[(&str, &str)]) -> Self {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Env(EnvInner::Fake(Arc::new(map)))
    }

    /// Read a variable, treating the empty string as unset
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match &self.0 {
            EnvInner::Real => std::env::var(key).ok(),
            EnvInner::Fake(map) => map.get(key).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Handle for reading the file system
#[derive(Clone, Debug, Default)]
pub struct Fs(FsInner);

#[derive(Clone, Debug, Default)]
enum FsInner {
    #[default]
    Real,
    Fake(Arc<HashMap<PathBuf, Vec<u8>>>),
}

impl Fs {
    /// An `Fs` backed by the real file system
    pub fn real() -> Self {
        Fs(FsInner::Real)
    }

    /// A fake `Fs` containing exactly the given path → contents entries
    pub fn from_map(files: HashMap<impl Into<PathBuf>, impl Into<Vec<u8>>>) -> Self {
        let map = files
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Fs(FsInner::Fake(Arc::new(map)))
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        match &self.0 {
            FsInner::Real => path.as_ref().exists(),
            FsInner::Fake(map) => map.contains_key(path.as_ref()),
        }
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> io::Result<String> {
        match &self.0 {
            FsInner::Real => std::fs::read_to_string(path),
            FsInner::Fake(map) => {
                let bytes = map.get(path.as_ref()).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "file not found")
                })?;
                String::from_utf8(bytes.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
        }
    }
}
