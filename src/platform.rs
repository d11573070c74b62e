use crate::types::PlatformInfo;

/// Host platform using the architecture names the agent's tool cache expects
/// (`x64`, `arm64`, `ia32`, `arm`).
pub fn get_system_info() -> PlatformInfo {
    PlatformInfo {
        os: std::env::consts::OS.to_string(),
        arch: normalize_arch(std::env::consts::ARCH),
    }
}

pub fn host_arch() -> String {
    get_system_info().arch
}

pub fn normalize_arch(arch: &str) -> String {
    match arch {
        "x86_64" | "amd64" => "x64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" | "i386" | "i686" => "ia32".to_string(),
        _ => arch.to_string(),
    }
}

pub fn is_windows() -> bool {
    cfg!(windows)
}
