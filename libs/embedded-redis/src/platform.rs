//! Tagged operating system / CPU architecture key used for executable lookup.

use std::fmt;

/// Operating system family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Other,
}

/// CPU architecture of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    Amd64,
    Aarch64,
    Other,
}

/// An (OS, architecture) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Architecture,
}

impl Platform {
    pub const LINUX_X86: Self = Self::new(Os::Linux, Architecture::X86);
    pub const LINUX_AMD64: Self = Self::new(Os::Linux, Architecture::Amd64);
    pub const MACOS_X86: Self = Self::new(Os::MacOs, Architecture::X86);
    pub const MACOS_AMD64: Self = Self::new(Os::MacOs, Architecture::Amd64);

    #[must_use]
    pub const fn new(os: Os, arch: Architecture) -> Self {
        Self { os, arch }
    }

    /// Platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        Self::from_consts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps `std::env::consts::{OS, ARCH}` style names onto the tagged key.
    #[must_use]
    pub fn from_consts(os: &str, arch: &str) -> Self {
        let os = match os {
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            "windows" => Os::Windows,
            _ => Os::Other,
        };
        let arch = match arch {
            "x86" => Architecture::X86,
            "x86_64" => Architecture::Amd64,
            "aarch64" => Architecture::Aarch64,
            _ => Architecture::Other,
        };
        Self { os, arch }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Os::Linux => "linux",
            Os::MacOs => "macos",
            Os::Windows => "windows",
            Os::Other => "unknown-os",
        })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Architecture::X86 => "x86",
            Architecture::Amd64 => "amd64",
            Architecture::Aarch64 => "aarch64",
            Architecture::Other => "unknown-arch",
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
