//! Typed model of the boot configuration document.
//!
//! The document is TOML with global sections (`boot`, `run`, `test`, `grub`,
//! `qemu`) and an array of named scheme overlays (`[[scheme]]`). Every
//! override field is `Option` so that overlay application is a plain
//! key-presence check: a field a layer does not set is left alone, a field it
//! sets replaces the working value wholesale.
//!
//! Schemes are an array of tables rather than a map so a duplicate scheme
//! name is expressible in the source document and rejected here with
//! [`ConfigError::DuplicateScheme`] instead of a generic parse error.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config '{path}': {cause}")]
    Read {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("parsing config '{path}': {cause}")]
    Parse {
        path: PathBuf,
        #[source]
        cause: Box<toml::de::Error>,
    },

    #[error("duplicate scheme '{name}' in config '{path}'")]
    DuplicateScheme { name: String, path: PathBuf },
}

/// The `boot` section and its per-context / per-scheme overlays.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootSection {
    pub method: Option<String>,
    pub kcmd_args: Option<Vec<String>>,
    pub init: Option<String>,
    pub init_args: Option<Vec<String>>,
    pub initramfs: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrubSection {
    pub protocol: Option<String>,
    pub mkrescue_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QemuSection {
    /// A single argument-list template, expanded after all overlays merge.
    pub args: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub features: Option<Vec<String>>,
}

/// Overlay layer selected by the Run/Test context (`[run]` / `[test]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSection {
    pub boot: Option<BootSection>,
    pub qemu: Option<QemuSection>,
}

/// A named, optionally architecture-gated overlay selectable at run time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemeOverlay {
    pub name: String,
    /// Architectures this scheme may run on; absent means all.
    pub supported_archs: Option<Vec<String>>,
    pub boot: Option<BootSection>,
    pub grub: Option<GrubSection>,
    pub qemu: Option<QemuSection>,
    pub build: Option<BuildSection>,
}

/// The whole configuration document. Immutable after load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigModel {
    pub boot: Option<BootSection>,
    pub run: Option<ContextSection>,
    pub test: Option<ContextSection>,
    pub grub: Option<GrubSection>,
    pub qemu: Option<QemuSection>,
    #[serde(default)]
    pub scheme: Vec<SchemeOverlay>,
}

impl ConfigModel {
    /// Load and validate a configuration document from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|cause| ConfigError::Read {
            path: path.to_path_buf(),
            cause,
        })?;
        Self::from_toml(&raw, path)
    }

    /// Parse a configuration document; `origin` is used in error messages.
    pub fn from_toml(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let model: ConfigModel = toml::from_str(raw).map_err(|cause| ConfigError::Parse {
            path: origin.to_path_buf(),
            cause: Box::new(cause),
        })?;

        let mut seen = BTreeSet::new();
        for scheme in &model.scheme {
            if !seen.insert(scheme.name.as_str()) {
                return Err(ConfigError::DuplicateScheme {
                    name: scheme.name.clone(),
                    path: origin.to_path_buf(),
                });
            }
        }

        Ok(model)
    }

    pub fn scheme(&self, name: &str) -> Option<&SchemeOverlay> {
        self.scheme.iter().find(|scheme| scheme.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[boot]
method = "grub-rescue-iso"
kcmd_args = ["console=ttyS0", "panic=1"]
init = "/usr/bin/busybox"
init_args = ["sh"]
initramfs = "build/initramfs.cpio.gz"

[grub]
protocol = "multiboot2"

[qemu]
args = "$(./tools/qemu_args.sh normal -ovmf)"

[test.boot]
kcmd_args = ["console=ttyS0", "panic=1", "test=1"]

[test.qemu]
args = "$(./tools/qemu_args.sh test)"

[[scheme]]
name = "microvm"
supported_archs = ["x86_64"]

[scheme.qemu]
args = "$(./tools/qemu_args.sh microvm)"

[[scheme]]
name = "tdx"
supported_archs = ["x86_64"]

[scheme.boot]
method = "grub-qcow2"

[scheme.grub]
protocol = "linux"

[scheme.build]
features = ["intel_tdx"]
"#;

    fn origin() -> PathBuf {
        PathBuf::from("boot.toml")
    }

    #[test]
    fn parses_full_document() {
        let model = ConfigModel::from_toml(SAMPLE, &origin()).unwrap();
        let boot = model.boot.as_ref().unwrap();
        assert_eq!(boot.method.as_deref(), Some("grub-rescue-iso"));
        assert_eq!(model.scheme.len(), 2);

        let tdx = model.scheme("tdx").unwrap();
        assert_eq!(tdx.supported_archs.as_deref(), Some(&["x86_64".to_string()][..]));
        assert_eq!(
            tdx.build.as_ref().unwrap().features.as_deref(),
            Some(&["intel_tdx".to_string()][..])
        );
    }

    #[test]
    fn unknown_scheme_lookup_is_none() {
        let model = ConfigModel::from_toml(SAMPLE, &origin()).unwrap();
        assert!(model.scheme("sev").is_none());
    }

    #[test]
    fn duplicate_scheme_names_are_rejected() {
        let raw = r#"
[boot]
method = "qemu-direct"

[[scheme]]
name = "microvm"

[[scheme]]
name = "microvm"
"#;
        let err = ConfigModel::from_toml(raw, &origin()).unwrap_err();
        match err {
            ConfigError::DuplicateScheme { name, .. } => assert_eq!(name, "microvm"),
            other => panic!("expected DuplicateScheme, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"
[boot]
method = "qemu-direct"
typo_field = true
"#;
        assert!(matches!(
            ConfigModel::from_toml(raw, &origin()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn empty_document_parses() {
        let model = ConfigModel::from_toml("", &origin()).unwrap();
        assert!(model.boot.is_none());
        assert!(model.scheme.is_empty());
    }
}
