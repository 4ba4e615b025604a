//! Configuration resolution: base + context overlay + scheme overlay.
//!
//! `resolve` merges the layers of a [`ConfigModel`] into one concrete
//! [`ResolvedConfig`] for a specific (context, scheme, architecture)
//! combination. Override precedence is strict and total: scheme > context >
//! base, field by field. Expansion runs exactly once, after all layers are
//! applied, so overlay text is merged raw and no field is double-expanded.
//!
//! Resolution is pure apart from command substitution, which may spawn
//! collaborator scripts whose output is not assumed deterministic. A
//! ResolvedConfig is never mutated after it is produced; re-resolve on any
//! input change.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{BootSection, BuildSection, ConfigModel, GrubSection, QemuSection};
use crate::expand::{expand, ExpandError};

/// Whether this invocation is a normal run or a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Run,
    Test,
}

impl Context {
    pub fn as_str(self) -> &'static str {
        match self {
            Context::Run => "run",
            Context::Test => "test",
        }
    }
}

/// The pipeline used to get the guest kernel running under the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootMethod {
    GrubRescueIso,
    QemuDirect,
    GrubQcow2,
}

impl BootMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "grub-rescue-iso" => Some(BootMethod::GrubRescueIso),
            "qemu-direct" => Some(BootMethod::QemuDirect),
            "grub-qcow2" => Some(BootMethod::GrubQcow2),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BootMethod::GrubRescueIso => "grub-rescue-iso",
            BootMethod::QemuDirect => "qemu-direct",
            BootMethod::GrubQcow2 => "grub-qcow2",
        }
    }
}

impl fmt::Display for BootMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How GRUB hands off to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrubProtocol {
    Multiboot2,
    Linux,
}

impl GrubProtocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "multiboot2" => Some(GrubProtocol::Multiboot2),
            "linux" => Some(GrubProtocol::Linux),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GrubProtocol::Multiboot2 => "multiboot2",
            GrubProtocol::Linux => "linux",
        }
    }
}

impl fmt::Display for GrubProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown scheme '{0}'")]
    UnknownScheme(String),

    #[error("scheme '{scheme}' does not support architecture '{arch}' (supported: {supported})")]
    UnsupportedArchitecture {
        scheme: String,
        arch: String,
        supported: String,
    },

    #[error(
        "unrecognized boot method '{0}' (expected 'grub-rescue-iso', 'qemu-direct', or 'grub-qcow2')"
    )]
    InvalidBootMethod(String),

    #[error("unrecognized grub protocol '{0}' (expected 'multiboot2' or 'linux')")]
    InvalidGrubProtocol(String),

    #[error(transparent)]
    Expand(#[from] ExpandError),
}

/// The fully merged, fully expanded configuration for one resolution request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub boot_method: BootMethod,
    pub grub_protocol: GrubProtocol,
    pub grub_mkrescue_path: String,
    pub qemu_args: String,
    pub kcmd_args: Vec<String>,
    pub init_path: String,
    pub init_args: Vec<String>,
    pub initramfs_path: PathBuf,
    pub build_features: BTreeSet<String>,
    pub arch: String,
}

/// Resolve against the current process environment.
pub fn resolve(
    model: &ConfigModel,
    context: Context,
    scheme_name: Option<&str>,
    arch: &str,
) -> Result<ResolvedConfig, ResolveError> {
    resolve_with(model, context, scheme_name, arch, |name| {
        std::env::var(name).ok()
    })
}

/// Resolve with an explicit variable lookup (tests stub the environment here).
pub fn resolve_with<F>(
    model: &ConfigModel,
    context: Context,
    scheme_name: Option<&str>,
    arch: &str,
    lookup: F,
) -> Result<ResolvedConfig, ResolveError>
where
    F: Fn(&str) -> Option<String>,
{
    // Working set starts from the base sections.
    let mut boot = model.boot.clone().unwrap_or_default();
    let mut grub = model.grub.clone().unwrap_or_default();
    let mut qemu = model.qemu.clone().unwrap_or_default();
    let mut build = BuildSection::default();

    // Context overlay.
    let ctx = match context {
        Context::Run => model.run.as_ref(),
        Context::Test => model.test.as_ref(),
    };
    if let Some(ctx) = ctx {
        if let Some(overlay) = &ctx.boot {
            overlay_boot(&mut boot, overlay);
        }
        if let Some(overlay) = &ctx.qemu {
            overlay_qemu(&mut qemu, overlay);
        }
    }

    // Scheme overlay. An arch-gated scheme outside its declared set is an
    // error, never a silent fallback to the base configuration.
    if let Some(name) = scheme_name {
        let scheme = model
            .scheme(name)
            .ok_or_else(|| ResolveError::UnknownScheme(name.to_string()))?;

        if let Some(archs) = &scheme.supported_archs {
            if !archs.is_empty() && !archs.iter().any(|supported| supported == arch) {
                return Err(ResolveError::UnsupportedArchitecture {
                    scheme: name.to_string(),
                    arch: arch.to_string(),
                    supported: archs.join(", "),
                });
            }
        }

        if let Some(overlay) = &scheme.boot {
            overlay_boot(&mut boot, overlay);
        }
        if let Some(overlay) = &scheme.grub {
            overlay_grub(&mut grub, overlay);
        }
        if let Some(overlay) = &scheme.qemu {
            overlay_qemu(&mut qemu, overlay);
        }
        if let Some(overlay) = &scheme.build {
            if overlay.features.is_some() {
                build.features = overlay.features.clone();
            }
        }
    }

    // Expansion pass: every string field, exactly once, after all layers.
    let method_raw = expand(boot.method.as_deref().unwrap_or(""), &lookup)?;
    let boot_method =
        BootMethod::parse(&method_raw).ok_or(ResolveError::InvalidBootMethod(method_raw))?;

    let protocol_raw = expand(grub.protocol.as_deref().unwrap_or("multiboot2"), &lookup)?;
    let grub_protocol = GrubProtocol::parse(&protocol_raw)
        .ok_or(ResolveError::InvalidGrubProtocol(protocol_raw))?;

    let grub_mkrescue_path = expand(
        grub.mkrescue_path.as_deref().unwrap_or("grub-mkrescue"),
        &lookup,
    )?;
    let qemu_args = expand(qemu.args.as_deref().unwrap_or(""), &lookup)?;
    let init_path = expand(boot.init.as_deref().unwrap_or("/sbin/init"), &lookup)?;
    let initramfs_path = PathBuf::from(expand(boot.initramfs.as_deref().unwrap_or(""), &lookup)?);

    let kcmd_args = expand_list(boot.kcmd_args.as_deref().unwrap_or_default(), &lookup)?;
    let init_args = expand_list(boot.init_args.as_deref().unwrap_or_default(), &lookup)?;
    let build_features = expand_list(build.features.as_deref().unwrap_or_default(), &lookup)?
        .into_iter()
        .collect();

    Ok(ResolvedConfig {
        boot_method,
        grub_protocol,
        grub_mkrescue_path,
        qemu_args,
        kcmd_args,
        init_path,
        init_args,
        initramfs_path,
        build_features,
        arch: arch.to_string(),
    })
}

// Overlay application is key-presence replacement: a set field replaces the
// working value wholesale (lists included), an unset field leaves it alone.

fn overlay_boot(base: &mut BootSection, overlay: &BootSection) {
    if overlay.method.is_some() {
        base.method = overlay.method.clone();
    }
    if overlay.kcmd_args.is_some() {
        base.kcmd_args = overlay.kcmd_args.clone();
    }
    if overlay.init.is_some() {
        base.init = overlay.init.clone();
    }
    if overlay.init_args.is_some() {
        base.init_args = overlay.init_args.clone();
    }
    if overlay.initramfs.is_some() {
        base.initramfs = overlay.initramfs.clone();
    }
}

fn overlay_grub(base: &mut GrubSection, overlay: &GrubSection) {
    if overlay.protocol.is_some() {
        base.protocol = overlay.protocol.clone();
    }
    if overlay.mkrescue_path.is_some() {
        base.mkrescue_path = overlay.mkrescue_path.clone();
    }
}

fn overlay_qemu(base: &mut QemuSection, overlay: &QemuSection) {
    if overlay.args.is_some() {
        base.args = overlay.args.clone();
    }
}

fn expand_list<F>(items: &[String], lookup: &F) -> Result<Vec<String>, ExpandError>
where
    F: Fn(&str) -> Option<String>,
{
    items.iter().map(|item| expand(item, lookup)).collect()
}
