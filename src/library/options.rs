//! Library configuration options.

use std::time::Duration;

use crate::library::error::{Error, Result};
use crate::transaction::{DEFAULT_CAPACITY, DEFAULT_TIMEOUT};

pub const ENV_TRANSACTIONAL: &str = "GITARCHIVE_TRANSACTIONAL";
pub const ENV_ROOTED: &str = "GITARCHIVE_ROOTED";
pub const ENV_TIMEOUT_MS: &str = "GITARCHIVE_TIMEOUT_MS";
pub const ENV_REGISTRY_CACHE: &str = "GITARCHIVE_REGISTRY_CACHE";
pub const ENV_BUCKET: &str = "GITARCHIVE_BUCKET";

/// Library configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryOptions {
    /// Isolate writes in an overlay until commit.
    pub transactional: bool,
    /// Host several repositories per container, namespaced by id.
    pub rooted: bool,
    /// How long a writer waits for a location's permit.
    pub timeout: Duration,
    /// Number of locations kept open, 0 disables caching.
    pub registry_cache: usize,
    /// Length of the id prefix used as a directory level, 0 for a flat layout.
    pub bucket: usize,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            transactional: false,
            rooted: false,
            timeout: DEFAULT_TIMEOUT,
            registry_cache: DEFAULT_CAPACITY,
            bucket: 0,
        }
    }
}

impl LibraryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transactional flag.
    pub fn transactional(mut self, value: bool) -> Self {
        self.transactional = value;
        self
    }

    /// Set rooted flag.
    pub fn rooted(mut self, value: bool) -> Self {
        self.rooted = value;
        self
    }

    /// Set the write permit timeout.
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Set the location cache capacity.
    pub fn registry_cache(mut self, value: usize) -> Self {
        self.registry_cache = value;
        self
    }

    /// Set the bucket length.
    pub fn bucket(mut self, value: usize) -> Self {
        self.bucket = value;
        self
    }

    /// Defaults overridden by `GITARCHIVE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(value) = lookup(ENV_TRANSACTIONAL) {
            options.transactional = parse_bool(ENV_TRANSACTIONAL, &value)?;
        }
        if let Some(value) = lookup(ENV_ROOTED) {
            options.rooted = parse_bool(ENV_ROOTED, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            options.timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_REGISTRY_CACHE) {
            options.registry_cache = parse_size(ENV_REGISTRY_CACHE, &value)?;
        }
        if let Some(value) = lookup(ENV_BUCKET) {
            options.bucket = parse_size(ENV_BUCKET, &value)?;
        }

        Ok(options)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::InvalidConfig(format!("{} must be a non-negative integer, got {:?}", name, value))
    })
}

fn parse_size(name: &str, value: &str) -> Result<usize> {
    let number = parse_number(name, value)?;
    usize::try_from(number).map_err(|_| {
        Error::InvalidConfig(format!("{} is too large for this platform, got {}", name, number))
    })
}
