//! Package manager backends.
//!
//! One capability surface over the native package managers plus Flatpak
//! as the universal fallback. The backend is selected once at startup;
//! everything downstream matches on the enum instead of branching on
//! strings.

use duct::cmd;
use thiserror::Error;

use crate::catalog::CommandStep;
use crate::distro::OperatingSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    /// Universal fallback, available on any distro with flatpak installed.
    Flatpak,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no supported package manager for {distro}")]
    Unsupported { distro: String },
    #[error("package manager '{binary}' required for {backend} is not installed")]
    BinaryMissing {
        backend: &'static str,
        binary: &'static str,
    },
    #[error("unknown backend name '{0}'")]
    UnknownName(String),
}

impl Backend {
    /// The key used in catalog `install` maps.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Flatpak => "flatpak",
        }
    }

    /// Catalog key of the universal fallback backend.
    pub fn fallback_key() -> &'static str {
        Self::Flatpak.key()
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Flatpak => "flatpak",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Apt => "APT",
            Self::Dnf => "DNF",
            Self::Pacman => "Pacman",
            Self::Zypper => "Zypper",
            Self::Flatpak => "Flatpak",
        }
    }

    /// Whether this backend's mutating commands need root.
    pub fn needs_elevation(&self) -> bool {
        !matches!(self, Self::Flatpak)
    }

    /// Native backend for the given OS, without availability checks.
    pub fn native_for(os: &OperatingSystem) -> Option<Self> {
        if os.is_arch_based() {
            Some(Self::Pacman)
        } else if os.is_debian_based() {
            Some(Self::Apt)
        } else if os.is_rpm_based() {
            Some(Self::Dnf)
        } else if matches!(os, OperatingSystem::OpenSUSE) {
            Some(Self::Zypper)
        } else {
            None
        }
    }

    /// Select the backend for this run. A missing binary is fatal here,
    /// not at call time.
    pub fn select(os: &OperatingSystem) -> Result<Self, BackendError> {
        let backend = match Self::native_for(os) {
            Some(b) => b,
            // Unknown distro: probe for any supported manager on PATH,
            // the way the original fell back when os-release was unhelpful.
            None => [Self::Apt, Self::Dnf, Self::Pacman, Self::Zypper]
                .into_iter()
                .find(|b| which::which(b.binary()).is_ok())
                .ok_or_else(|| BackendError::Unsupported {
                    distro: os.to_string(),
                })?,
        };

        if which::which(backend.binary()).is_err() {
            return Err(BackendError::BinaryMissing {
                backend: backend.display_name(),
                binary: backend.binary(),
            });
        }
        Ok(backend)
    }

    pub fn from_name(name: &str) -> Result<Self, BackendError> {
        match name {
            "apt" => Ok(Self::Apt),
            "dnf" => Ok(Self::Dnf),
            "pacman" => Ok(Self::Pacman),
            "zypper" => Ok(Self::Zypper),
            "flatpak" => Ok(Self::Flatpak),
            other => Err(BackendError::UnknownName(other.to_string())),
        }
    }

    /// Build the non-interactive install command for a set of packages.
    pub fn install_step(&self, packages: &[String]) -> CommandStep {
        let names = packages.join(" ");
        let command = match self {
            Self::Apt => format!("apt install -y {names}"),
            Self::Dnf => format!("dnf install -y {names}"),
            Self::Pacman => format!("pacman -S --noconfirm --needed {names}"),
            Self::Zypper => format!("zypper install -y {names}"),
            Self::Flatpak => format!("flatpak install -y flathub {names}"),
        };
        CommandStep::described(
            command,
            format!("Install {names} via {}", self.display_name()),
        )
    }

    /// Build the cache/repository refresh command.
    pub fn refresh_step(&self) -> CommandStep {
        let command = match self {
            Self::Apt => "apt update",
            Self::Dnf => "dnf check-update",
            Self::Pacman => "pacman -Sy",
            Self::Zypper => "zypper refresh",
            Self::Flatpak => "flatpak update --appstream",
        };
        CommandStep::described(command, format!("Refresh {} metadata", self.display_name()))
    }

    /// Build the full system upgrade sequence.
    pub fn upgrade_steps(&self) -> Vec<CommandStep> {
        match self {
            Self::Apt => vec![
                CommandStep::described("apt update", "Update package lists"),
                CommandStep::described("apt full-upgrade -y", "Upgrade all packages"),
            ],
            Self::Dnf => vec![CommandStep::described(
                "dnf upgrade -y",
                "Upgrade all packages",
            )],
            Self::Pacman => vec![CommandStep::described(
                "pacman -Syu --noconfirm",
                "Sync and upgrade all packages",
            )],
            Self::Zypper => vec![
                CommandStep::described("zypper refresh", "Refresh repositories"),
                CommandStep::described("zypper update -y", "Upgrade all packages"),
            ],
            Self::Flatpak => vec![CommandStep::described(
                "flatpak update -y",
                "Update all Flatpak apps",
            )],
        }
    }

    /// Normalize refresh exit codes. `dnf check-update` exits 100 when
    /// updates are available; that is success, not failure.
    pub fn refresh_exit_ok(&self, code: i32) -> bool {
        match self {
            Self::Dnf => code == 0 || code == 100,
            _ => code == 0,
        }
    }

    /// Read-only query: is the package installed according to this
    /// backend's database?
    pub fn is_package_installed(&self, package: &str) -> bool {
        let status = match self {
            Self::Apt => cmd!("dpkg-query", "-W", "-f=${Status}", package)
                .unchecked()
                .stderr_null()
                .read()
                .map(|out| out.contains("install ok installed")),
            Self::Dnf | Self::Zypper => cmd!("rpm", "-q", package)
                .unchecked()
                .stdout_null()
                .stderr_null()
                .run()
                .map(|out| out.status.success()),
            Self::Pacman => cmd!("pacman", "-Qi", package)
                .unchecked()
                .stdout_null()
                .stderr_null()
                .run()
                .map(|out| out.status.success()),
            Self::Flatpak => cmd!("flatpak", "info", package)
                .unchecked()
                .stdout_null()
                .stderr_null()
                .run()
                .map(|out| out.status.success()),
        };
        status.unwrap_or(false)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_for_families() {
        assert_eq!(
            Backend::native_for(&OperatingSystem::Manjaro),
            Some(Backend::Pacman)
        );
        assert_eq!(
            Backend::native_for(&OperatingSystem::LinuxMint),
            Some(Backend::Apt)
        );
        assert_eq!(
            Backend::native_for(&OperatingSystem::Rocky),
            Some(Backend::Dnf)
        );
        assert_eq!(
            Backend::native_for(&OperatingSystem::OpenSUSE),
            Some(Backend::Zypper)
        );
        assert_eq!(
            Backend::native_for(&OperatingSystem::Unknown("void".into())),
            None
        );
    }

    #[test]
    fn test_install_step_flags_are_noninteractive() {
        let pkgs = vec!["htop".to_string(), "curl".to_string()];
        assert_eq!(
            Backend::Apt.install_step(&pkgs).command,
            "apt install -y htop curl"
        );
        assert_eq!(
            Backend::Pacman.install_step(&pkgs).command,
            "pacman -S --noconfirm --needed htop curl"
        );
        assert_eq!(
            Backend::Flatpak.install_step(&pkgs).command,
            "flatpak install -y flathub htop curl"
        );
    }

    #[test]
    fn test_refresh_exit_ok_dnf_quirk() {
        assert!(Backend::Dnf.refresh_exit_ok(0));
        assert!(Backend::Dnf.refresh_exit_ok(100));
        assert!(!Backend::Dnf.refresh_exit_ok(1));
        assert!(!Backend::Apt.refresh_exit_ok(100));
    }

    #[test]
    fn test_from_name_round_trip() {
        for backend in [
            Backend::Apt,
            Backend::Dnf,
            Backend::Pacman,
            Backend::Zypper,
            Backend::Flatpak,
        ] {
            assert_eq!(Backend::from_name(backend.key()).unwrap(), backend);
        }
        assert!(Backend::from_name("brew").is_err());
    }

    #[test]
    fn test_only_flatpak_runs_unprivileged() {
        assert!(Backend::Apt.needs_elevation());
        assert!(!Backend::Flatpak.needs_elevation());
    }
}
