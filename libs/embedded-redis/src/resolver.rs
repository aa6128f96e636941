//! Executable resolution: (instance kind, OS, architecture) -> binary path.
//!
//! Two immutable tables, one per [`InstanceKind`], are built once on first use.
//! Callers can layer a base directory and per-entry overrides on top of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{RedisError, Result};
use crate::instance::InstanceKind;
use crate::platform::{Architecture, Os, Platform};

static SERVER_EXECUTABLES: LazyLock<HashMap<Platform, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        (Platform::LINUX_X86, "redis-server-linux-386"),
        (Platform::LINUX_AMD64, "redis-server-linux-amd64"),
        (Platform::MACOS_X86, "redis-server-darwin"),
        (Platform::MACOS_AMD64, "redis-server-darwin"),
    ])
});

static SENTINEL_EXECUTABLES: LazyLock<HashMap<Platform, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        (Platform::LINUX_X86, "redis-sentinel-linux-386"),
        (Platform::LINUX_AMD64, "redis-sentinel-linux-amd64"),
        (Platform::MACOS_X86, "redis-sentinel-darwin"),
        (Platform::MACOS_AMD64, "redis-sentinel-darwin"),
    ])
});

fn table(kind: InstanceKind) -> &'static HashMap<Platform, &'static str> {
    match kind {
        InstanceKind::Server => &SERVER_EXECUTABLES,
        InstanceKind::Sentinel => &SENTINEL_EXECUTABLES,
    }
}

/// Resolves the native binary to launch for an instance kind.
///
/// Resolution order: an explicit per-kind executable, then a per-platform
/// override, then the static table (joined onto the base directory when the
/// entry is relative). Existence is not checked here; a missing binary
/// surfaces when the process is launched.
#[derive(Debug, Clone, Default)]
pub struct ExecutableResolver {
    base_dir: Option<PathBuf>,
    overrides: HashMap<(InstanceKind, Platform), PathBuf>,
    explicit: HashMap<InstanceKind, PathBuf>,
}

impl ExecutableResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that relative table entries are resolved against.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Replaces the table entry for one kind on one platform.
    #[must_use]
    pub fn override_for(
        mut self,
        kind: InstanceKind,
        platform: Platform,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.overrides.insert((kind, platform), path.into());
        self
    }

    /// Uses `path` for `kind` on every platform, bypassing the table.
    #[must_use]
    pub fn with_executable(mut self, kind: InstanceKind, path: impl Into<PathBuf>) -> Self {
        self.explicit.insert(kind, path.into());
        self
    }

    /// Resolves the executable for `kind` on the given OS and architecture.
    ///
    /// # Errors
    /// Returns `RedisError::UnsupportedPlatform` when neither an explicit
    /// executable nor a table entry exists for the combination.
    pub fn resolve(&self, kind: InstanceKind, os: Os, arch: Architecture) -> Result<PathBuf> {
        self.resolve_for(kind, Platform::new(os, arch))
    }

    /// Same as [`resolve`](Self::resolve) with a prebuilt platform key.
    ///
    /// # Errors
    /// Returns `RedisError::UnsupportedPlatform` when no mapping exists.
    pub fn resolve_for(&self, kind: InstanceKind, platform: Platform) -> Result<PathBuf> {
        if let Some(path) = self.explicit.get(&kind) {
            return Ok(path.clone());
        }
        if let Some(path) = self.overrides.get(&(kind, platform)) {
            return Ok(path.clone());
        }
        let entry = table(kind)
            .get(&platform)
            .ok_or(RedisError::UnsupportedPlatform { kind, platform })?;
        Ok(self.join_base(Path::new(entry)))
    }

    /// Resolves the executable for the platform this process runs on.
    ///
    /// # Errors
    /// Returns `RedisError::UnsupportedPlatform` on hosts without a mapping.
    pub fn resolve_current(&self, kind: InstanceKind) -> Result<PathBuf> {
        self.resolve_for(kind, Platform::current())
    }

    fn join_base(&self, entry: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if entry.is_relative() => base.join(entry),
            _ => entry.to_path_buf(),
        }
    }
}
