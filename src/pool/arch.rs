// src/pool/arch.rs

//! Architecture compatibility policy

use tracing::warn;

/// Architectures that can never be installed
const SOURCE_ARCHES: &[&str] = &["src", "nosrc"];

/// Compatibility chains, best first; `noarch` is appended to every chain
const ARCH_CHAINS: &[(&str, &[&str])] = &[
    ("x86_64", &["x86_64", "amd64", "i686", "i586", "i486", "i386"]),
    ("i686", &["i686", "i586", "i486", "i386"]),
    ("i586", &["i586", "i486", "i386"]),
    ("i486", &["i486", "i386"]),
    ("i386", &["i386"]),
    ("aarch64", &["aarch64"]),
    ("armv7hl", &["armv7hl", "armv7l", "armv6l", "armv5tel"]),
    ("armv7l", &["armv7l", "armv6l", "armv5tel"]),
    ("armv6l", &["armv6l", "armv5tel"]),
    ("ppc64le", &["ppc64le"]),
    ("ppc64", &["ppc64", "ppc"]),
    ("ppc", &["ppc"]),
    ("s390x", &["s390x", "s390"]),
    ("riscv64", &["riscv64"]),
];

/// The pool's architecture and the arches it can install
#[derive(Debug, Clone)]
pub struct ArchPolicy {
    arch: String,
    compatible: Vec<String>,
}

impl ArchPolicy {
    /// Build the policy for a machine architecture (as reported by `uname -m`)
    pub fn new(machine: &str) -> Self {
        let mut compatible: Vec<String> = ARCH_CHAINS
            .iter()
            .find(|(arch, _)| *arch == machine)
            .map(|(_, chain)| chain.iter().map(|a| a.to_string()).collect())
            .unwrap_or_else(|| vec![machine.to_string()]);
        compatible.push("noarch".to_string());

        Self {
            arch: machine.to_string(),
            compatible,
        }
    }

    /// Policy for the running machine, from the `uname` machine field
    pub fn native() -> Self {
        match nix::sys::utsname::uname() {
            Ok(uts) => Self::new(normalize_machine(&uts.machine().to_string_lossy())),
            Err(e) => {
                let fallback = normalize_machine(std::env::consts::ARCH);
                warn!("uname failed ({}), assuming {}", e, fallback);
                Self::new(fallback)
            }
        }
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// True if packages of `arch` can be installed
    pub fn is_compatible(&self, arch: &str) -> bool {
        !SOURCE_ARCHES.contains(&arch) && self.compatible.iter().any(|a| a == arch)
    }

    /// True if `arch` is an architecture this pool knows about
    ///
    /// Used to decide whether a `.suffix` on an atom is an architecture.
    pub fn is_known(&self, arch: &str) -> bool {
        self.compatible.iter().any(|a| a == arch) || SOURCE_ARCHES.contains(&arch)
    }

    /// Position in the compatibility chain; lower is better
    pub fn score(&self, arch: &str) -> Option<usize> {
        self.compatible.iter().position(|a| a == arch)
    }
}

/// Map machine names reported by other systems onto RPM arch names
///
/// Also covers the target names of `std::env::consts::ARCH`, which is only
/// consulted when `uname` fails.
pub fn normalize_machine(machine: &str) -> &str {
    match machine {
        "amd64" => "x86_64",
        "x86" => "i686",
        "arm64" => "aarch64",
        "arm" => "armv7hl",
        "powerpc64le" => "ppc64le",
        "powerpc64" => "ppc64",
        "powerpc" => "ppc",
        other => other,
    }
}

impl Default for ArchPolicy {
    fn default() -> Self {
        Self::native()
    }
}
