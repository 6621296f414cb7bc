use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

pub const COMMAND_PATH_SEPARATOR: &str = if cfg!(windows) { "\\" } else { "/" };

/// Set inside a WSL distribution; forces the windows binary.
pub const WSL_DISTRO_ENV: &str = "WSL_DISTRO_NAME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Windows,
    Linux,
    Macos,
}

impl HostOs {
    pub fn token(self) -> &'static str {
        match self {
            HostOs::Windows => "windows",
            HostOs::Linux => "linux",
            HostOs::Macos => "macos",
        }
    }

    pub fn executable_suffix(self) -> &'static str {
        match self {
            HostOs::Windows => ".exe",
            HostOs::Linux | HostOs::Macos => "",
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// Checked in order; first substring hit wins.
const OS_MARKERS: &[(&str, HostOs)] = &[
    ("windows_nt", HostOs::Windows),
    ("windows", HostOs::Windows),
    ("linux", HostOs::Linux),
    ("darwin", HostOs::Macos),
    ("macos", HostOs::Macos),
];

/// `(os, rust arch, binary arch token)`. Release binaries are named after the
/// host CPU as the build machine reports it, which differs from
/// `std::env::consts::ARCH` on Apple Silicon.
const HOST_CPU_ALIASES: &[(&str, &str, &str)] = &[("macos", "aarch64", "arm64")];

/// Maps a `std::env::consts` OS/arch pair to the arch token used in binary names.
pub fn host_cpu_token<'a>(os: &str, arch: &'a str) -> &'a str {
    for &(alias_os, rust_arch, token) in HOST_CPU_ALIASES {
        if alias_os == os && rust_arch == arch {
            return token;
        }
    }
    arch
}

/// Host OS and CPU architecture, derived once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformIdentity {
    pub raw_os: String,
    pub os: Option<HostOs>,
    pub arch: String,
}

impl PlatformIdentity {
    pub fn new(os: HostOs, arch: impl Into<String>) -> Self {
        PlatformIdentity {
            raw_os: os.token().to_string(),
            os: Some(os),
            arch: arch.into(),
        }
    }

    /// Reads the running host.
    pub fn resolve() -> Self {
        let wsl = std::env::var(WSL_DISTRO_ENV).ok();
        let os = std::env::consts::OS;
        Self::classify(os, host_cpu_token(os, std::env::consts::ARCH), wsl.as_deref())
    }

    /// An unmatched OS string leaves `os` empty; the failure surfaces when a
    /// binary name is requested.
    pub fn classify(raw_os: &str, arch: &str, wsl_distro: Option<&str>) -> Self {
        let os = if wsl_distro.is_some_and(|name| !name.is_empty()) {
            Some(HostOs::Windows)
        } else {
            let lowered = raw_os.to_ascii_lowercase();
            OS_MARKERS
                .iter()
                .find(|(marker, _)| lowered.contains(marker))
                .map(|(_, os)| *os)
        };
        PlatformIdentity {
            raw_os: raw_os.to_string(),
            os,
            arch: arch.to_string(),
        }
    }

    pub fn require_os(&self) -> Result<HostOs> {
        self.os.ok_or_else(|| HarnessError::UnclassifiedPlatform {
            raw_os: self.raw_os.clone(),
        })
    }

    /// `<arch>-<os>-<base>[.exe]`
    pub fn binary_file_name(&self, base_name: &str) -> Result<String> {
        let os = self.require_os()?;
        Ok(format!(
            "{}-{}-{}{}",
            self.arch,
            os.token(),
            base_name,
            os.executable_suffix()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryReference {
    pub path: PathBuf,
}

impl BinaryReference {
    pub fn locate(platform: &PlatformIdentity, bin_dir: &Path, base_name: &str) -> Result<Self> {
        let file_name = platform.binary_file_name(base_name)?;
        Ok(BinaryReference {
            path: bin_dir.join(file_name),
        })
    }

    /// As it appears on the shell command line. `cmd` reads a forward slash
    /// as a switch, so Windows gets backslashes.
    pub fn command_path(&self) -> String {
        self.path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(COMMAND_PATH_SEPARATOR)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn sha256(&self, work_dir: &Path) -> Result<String> {
        sha256_hex(&work_dir.join(&self.path))
    }
}

pub fn sha256_hex(path: &Path) -> Result<String> {
    let io_err = |source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_supported_os() {
        let cases = [
            ("Windows_NT", HostOs::Windows),
            ("windows", HostOs::Windows),
            ("linux-gnu", HostOs::Linux),
            ("Linux", HostOs::Linux),
            ("darwin23", HostOs::Macos),
            ("macos", HostOs::Macos),
        ];
        for (raw, expected) in cases {
            let identity = PlatformIdentity::classify(raw, "x86_64", None);
            assert_eq!(identity.os, Some(expected), "raw os {raw}");
        }
    }

    #[test]
    fn wsl_override_forces_windows() {
        for raw in ["linux", "darwin", "freebsd", ""] {
            let identity = PlatformIdentity::classify(raw, "x86_64", Some("Ubuntu"));
            assert_eq!(identity.os, Some(HostOs::Windows), "raw os {raw}");
        }
    }

    #[test]
    fn empty_wsl_name_does_not_override() {
        let identity = PlatformIdentity::classify("linux", "x86_64", Some(""));
        assert_eq!(identity.os, Some(HostOs::Linux));
    }

    #[test]
    fn arch_passes_through_verbatim() {
        let identity = PlatformIdentity::classify("darwin", "arm64", None);
        assert_eq!(identity.arch, "arm64");
        assert_eq!(
            identity.binary_file_name("bugsnag-cli").unwrap(),
            "arm64-macos-bugsnag-cli"
        );
    }

    #[test]
    fn windows_binary_gets_exe_suffix() {
        let identity = PlatformIdentity::new(HostOs::Windows, "x86_64");
        assert_eq!(
            identity.binary_file_name("bugsnag-cli").unwrap(),
            "x86_64-windows-bugsnag-cli.exe"
        );
    }

    #[test]
    fn unclassified_os_fails_loudly() {
        let identity = PlatformIdentity::classify("freebsd", "amd64", None);
        assert_eq!(identity.os, None);
        let err = identity.binary_file_name("bugsnag-cli").unwrap_err();
        assert!(matches!(err, HarnessError::UnclassifiedPlatform { ref raw_os } if raw_os == "freebsd"));
    }

    #[test]
    fn locates_binary_under_bin_dir() {
        let identity = PlatformIdentity::new(HostOs::Linux, "x86_64");
        let binary = BinaryReference::locate(&identity, Path::new("bin"), "bugsnag-cli").unwrap();
        assert_eq!(binary.file_name(), "x86_64-linux-bugsnag-cli");
        let expected = if cfg!(windows) {
            "bin\\x86_64-linux-bugsnag-cli"
        } else {
            "bin/x86_64-linux-bugsnag-cli"
        };
        assert_eq!(binary.command_path(), expected);
    }

    #[test]
    fn nested_bin_dir_uses_shell_separator() {
        let identity = PlatformIdentity::new(HostOs::Windows, "x86_64");
        let binary = BinaryReference::locate(&identity, Path::new("dist/bin"), "bugsnag-cli").unwrap();
        let path = binary.command_path();
        assert_eq!(
            path,
            ["dist", "bin", "x86_64-windows-bugsnag-cli.exe"].join(COMMAND_PATH_SEPARATOR)
        );
        if cfg!(windows) {
            assert!(!path.contains('/'), "{path}");
        }
    }

    #[test]
    fn apple_silicon_uses_arm64_token() {
        assert_eq!(host_cpu_token("macos", "aarch64"), "arm64");
        assert_eq!(host_cpu_token("linux", "aarch64"), "aarch64");
        assert_eq!(host_cpu_token("macos", "x86_64"), "x86_64");
        assert_eq!(host_cpu_token("windows", "x86_64"), "x86_64");
    }

    #[test]
    fn hashes_binary_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob"), b"abc").unwrap();
        let digest = sha256_hex(&dir.path().join("blob")).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
