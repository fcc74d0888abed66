use std::fs;
use std::path::Path;

/// Represents a detected operating system with methods for family checks.
///
/// Detection reads `/etc/os-release` once; everything else is derived from
/// the parsed `ID`, `ID_LIKE` and `VERSION_ID` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatingSystem {
    Arch,
    Manjaro,
    EndeavourOS,
    Debian,
    Ubuntu,
    PopOS,
    LinuxMint,
    Fedora,
    CentOS,
    Rocky,
    AlmaLinux,
    OpenSUSE,
    /// Unknown distribution with its raw ID
    Unknown(String),
}

/// Detection result: the OS plus the version metadata catalogs care about.
#[derive(Debug, Clone)]
pub struct DistroInfo {
    pub os: OperatingSystem,
    /// `VERSION_ID` from os-release, e.g. "24.04" or "40"
    pub version: String,
    /// `PRETTY_NAME`, for display only
    pub pretty_name: String,
}

impl OperatingSystem {
    pub fn detect() -> DistroInfo {
        // /usr/lib/os-release is the documented fallback location
        for path in ["/etc/os-release", "/usr/lib/os-release"] {
            if Path::new(path).exists() {
                if let Ok(content) = fs::read_to_string(path) {
                    return Self::parse_os_release(&content);
                }
            }
        }
        DistroInfo {
            os: Self::Unknown("no os-release found".to_string()),
            version: String::new(),
            pretty_name: "Unknown Linux".to_string(),
        }
    }

    /// Parse os-release content and return the detected OS with metadata.
    pub fn parse_os_release(content: &str) -> DistroInfo {
        let mut id = String::new();
        let mut id_like = String::new();
        let mut version = String::new();
        let mut pretty_name = String::new();

        for line in content.lines() {
            if let Some(val) = line.strip_prefix("ID=") {
                id = val.trim_matches('"').to_string();
            } else if let Some(val) = line.strip_prefix("ID_LIKE=") {
                id_like = val.trim_matches('"').to_string();
            } else if let Some(val) = line.strip_prefix("VERSION_ID=") {
                version = val.trim_matches('"').to_string();
            } else if let Some(val) = line.strip_prefix("PRETTY_NAME=") {
                pretty_name = val.trim_matches('"').to_string();
            }
        }

        let os = match id.as_str() {
            "arch" => Self::Arch,
            "manjaro" => Self::Manjaro,
            "endeavouros" => Self::EndeavourOS,
            "debian" => Self::Debian,
            "ubuntu" => Self::Ubuntu,
            "pop" => Self::PopOS,
            "linuxmint" => Self::LinuxMint,
            "fedora" => Self::Fedora,
            "centos" => Self::CentOS,
            "rocky" => Self::Rocky,
            "almalinux" => Self::AlmaLinux,
            "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => Self::OpenSUSE,
            _ => {
                // Unknown IDs fall back to family detection via ID_LIKE
                if id_like.contains("arch") {
                    Self::Arch
                } else if id_like.contains("ubuntu") {
                    Self::Ubuntu
                } else if id_like.contains("debian") {
                    Self::Debian
                } else if id_like.contains("fedora") || id_like.contains("rhel") {
                    Self::Fedora
                } else if id_like.contains("suse") {
                    Self::OpenSUSE
                } else {
                    Self::Unknown(id.clone())
                }
            }
        };

        if pretty_name.is_empty() {
            pretty_name = id;
        }

        DistroInfo {
            os,
            version,
            pretty_name,
        }
    }

    /// Returns the parent OS that this distribution is based on.
    /// Returns `None` for root distributions and Unknown.
    pub fn based_on(&self) -> Option<Self> {
        match self {
            Self::Manjaro | Self::EndeavourOS => Some(Self::Arch),
            Self::PopOS | Self::LinuxMint => Some(Self::Ubuntu),
            Self::Ubuntu => Some(Self::Debian),
            Self::CentOS | Self::Rocky | Self::AlmaLinux => Some(Self::Fedora),
            Self::Arch | Self::Debian | Self::Fedora | Self::OpenSUSE | Self::Unknown(_) => None,
        }
    }

    pub fn is_arch_based(&self) -> bool {
        *self == Self::Arch || self.based_on().map(|p| p.is_arch_based()).unwrap_or(false)
    }

    pub fn is_debian_based(&self) -> bool {
        *self == Self::Debian
            || self
                .based_on()
                .map(|p| p.is_debian_based())
                .unwrap_or(false)
    }

    pub fn is_rpm_based(&self) -> bool {
        matches!(
            self,
            Self::Fedora | Self::CentOS | Self::Rocky | Self::AlmaLinux
        ) || self.based_on().map(|p| p.is_rpm_based()).unwrap_or(false)
    }

    /// Catalog file stem for the distro-specific overlay, e.g. "ubuntu.yaml".
    ///
    /// Derivatives use their own stem so a distro can ship its own overlay,
    /// and the loader falls back to the family stem when none exists.
    pub fn catalog_stem(&self) -> &str {
        match self {
            Self::Arch => "arch",
            Self::Manjaro => "manjaro",
            Self::EndeavourOS => "endeavouros",
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::PopOS => "pop",
            Self::LinuxMint => "linuxmint",
            Self::Fedora => "fedora",
            Self::CentOS => "centos",
            Self::Rocky => "rocky",
            Self::AlmaLinux => "almalinux",
            Self::OpenSUSE => "opensuse",
            Self::Unknown(id) => id,
        }
    }

    /// Family stem used when no distro-specific catalog overlay exists.
    pub fn family_stem(&self) -> Option<&'static str> {
        if self.is_arch_based() {
            Some("arch")
        } else if self.is_debian_based() {
            Some("debian")
        } else if self.is_rpm_based() {
            Some("fedora")
        } else if matches!(self, Self::OpenSUSE) {
            Some("opensuse")
        } else {
            None
        }
    }
}

impl std::fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Arch => "Arch Linux",
            Self::Manjaro => "Manjaro",
            Self::EndeavourOS => "EndeavourOS",
            Self::Debian => "Debian",
            Self::Ubuntu => "Ubuntu",
            Self::PopOS => "Pop!_OS",
            Self::LinuxMint => "Linux Mint",
            Self::Fedora => "Fedora",
            Self::CentOS => "CentOS",
            Self::Rocky => "Rocky Linux",
            Self::AlmaLinux => "AlmaLinux",
            Self::OpenSUSE => "openSUSE",
            Self::Unknown(id) => return write!(f, "Unknown ({})", id),
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release_ubuntu() {
        let content = r#"
NAME="Ubuntu"
ID=ubuntu
ID_LIKE=debian
VERSION_ID="24.04"
PRETTY_NAME="Ubuntu 24.04 LTS"
"#;
        let info = OperatingSystem::parse_os_release(content);
        assert_eq!(info.os, OperatingSystem::Ubuntu);
        assert_eq!(info.version, "24.04");
        assert_eq!(info.pretty_name, "Ubuntu 24.04 LTS");
    }

    #[test]
    fn test_parse_os_release_unknown_falls_back_to_id_like() {
        let content = "ID=neon\nID_LIKE=\"ubuntu debian\"\n";
        let info = OperatingSystem::parse_os_release(content);
        assert_eq!(info.os, OperatingSystem::Ubuntu);
    }

    #[test]
    fn test_parse_os_release_truly_unknown() {
        let content = "ID=voidlinux\n";
        let info = OperatingSystem::parse_os_release(content);
        assert_eq!(info.os, OperatingSystem::Unknown("voidlinux".to_string()));
    }

    #[test]
    fn test_family_checks() {
        assert!(OperatingSystem::Manjaro.is_arch_based());
        assert!(OperatingSystem::PopOS.is_debian_based());
        assert!(OperatingSystem::Rocky.is_rpm_based());
        assert!(!OperatingSystem::Fedora.is_debian_based());
    }

    #[test]
    fn test_family_stem_for_derivative() {
        assert_eq!(OperatingSystem::LinuxMint.family_stem(), Some("debian"));
        assert_eq!(OperatingSystem::EndeavourOS.family_stem(), Some("arch"));
        assert_eq!(
            OperatingSystem::Unknown("voidlinux".into()).family_stem(),
            None
        );
    }
}
