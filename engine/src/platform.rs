//! Host platform detection and release artifact naming.

use std::env::consts;

use linterhub_types::{Arch, EngineMode, Os, PlatformInfo};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported platform: {os}/{arch}")]
pub struct UnsupportedPlatformError {
    pub os: String,
    pub arch: String,
}

/// Release runtime identifiers, one row per supported platform.
const RUNTIME_IDS: &[(Os, Arch, &str)] = &[
    (Os::Macos, Arch::X64, "osx.10.11-x64"),
    (Os::Macos, Arch::Arm64, "osx-arm64"),
    (Os::Linux, Arch::X64, "debian.8-x64"),
    (Os::Linux, Arch::Arm64, "linux-arm64"),
    (Os::Windows, Arch::X64, "win10-x64"),
    (Os::Windows, Arch::X86, "win10-x86"),
];

/// Runtime id of the framework-dependent build; it runs anywhere `dotnet` does.
pub const PORTABLE_RUNTIME_ID: &str = "portable";

/// Detect the platform this process runs on.
pub fn current() -> Result<PlatformInfo, UnsupportedPlatformError> {
    from_target(consts::OS, consts::ARCH)
}

pub fn from_target(os: &str, arch: &str) -> Result<PlatformInfo, UnsupportedPlatformError> {
    match (Os::from_target(os), Arch::from_target(arch)) {
        (Some(os), Some(arch)) => Ok(PlatformInfo { os, arch }),
        _ => Err(UnsupportedPlatformError {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

/// Release runtime id for `platform`, e.g. `debian.8-x64`.
pub fn runtime_id(platform: PlatformInfo) -> Result<&'static str, UnsupportedPlatformError> {
    RUNTIME_IDS
        .iter()
        .find(|(os, arch, _)| *os == platform.os && *arch == platform.arch)
        .map(|(_, _, rid)| *rid)
        .ok_or_else(|| UnsupportedPlatformError {
            os: platform.os.as_str().to_string(),
            arch: platform.arch.as_str().to_string(),
        })
}

/// Runtime id of the artifact to download for `mode` on `platform`.
pub fn artifact_runtime_id(
    mode: EngineMode,
    platform: PlatformInfo,
) -> Result<&'static str, UnsupportedPlatformError> {
    match mode {
        EngineMode::ManagedRuntime => Ok(PORTABLE_RUNTIME_ID),
        EngineMode::NativeBinary | EngineMode::Container => runtime_id(platform),
    }
}
