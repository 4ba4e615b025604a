//! Preflight checks for launch validation.
//!
//! Validates that the host has the tools a resolved configuration will
//! invoke, before any artifact is built. This prevents cryptic mid-pipeline
//! errors (a missing `grub-mkrescue` surfacing only after staging, say).

use anyhow::{bail, Result};

use crate::plan::qemu_binary;
use crate::resolve::{BootMethod, ResolvedConfig};

/// Check if a command exists on the host system.
pub fn tool_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// The host tools a resolved configuration needs, as (command, package).
pub fn required_tools(resolved: &ResolvedConfig) -> Vec<(String, &'static str)> {
    let mut tools = vec![(qemu_binary(&resolved.arch), "qemu")];
    match resolved.boot_method {
        BootMethod::QemuDirect => {}
        BootMethod::GrubRescueIso => {
            tools.push((resolved.grub_mkrescue_path.clone(), "grub"));
            tools.push(("xorriso".to_string(), "xorriso"));
        }
        BootMethod::GrubQcow2 => {
            tools.push((resolved.grub_mkrescue_path.clone(), "grub"));
            tools.push(("xorriso".to_string(), "xorriso"));
            tools.push(("qemu-img".to_string(), "qemu-img"));
        }
    }
    tools
}

/// Check that every tool the configuration needs is available.
pub fn check_host_tools(resolved: &ResolvedConfig) -> Result<()> {
    let missing: Vec<_> = required_tools(resolved)
        .into_iter()
        .filter(|(tool, _)| !tool_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(tool, package)| format!("  {} (install: {})", tool, package))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use crate::resolve::GrubProtocol;

    fn resolved(method: BootMethod) -> ResolvedConfig {
        ResolvedConfig {
            boot_method: method,
            grub_protocol: GrubProtocol::Multiboot2,
            grub_mkrescue_path: "grub-mkrescue".to_string(),
            qemu_args: String::new(),
            kcmd_args: Vec::new(),
            init_path: "/sbin/init".to_string(),
            init_args: Vec::new(),
            initramfs_path: PathBuf::from("initramfs.cpio"),
            build_features: BTreeSet::new(),
            arch: "x86_64".to_string(),
        }
    }

    #[test]
    fn test_tool_exists() {
        assert!(tool_exists("ls"));
        assert!(!tool_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn direct_boot_needs_only_the_emulator() {
        let tools = required_tools(&resolved(BootMethod::QemuDirect));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].0, "qemu-system-x86_64");
    }

    #[test]
    fn image_methods_need_grub_tooling() {
        let iso_tools = required_tools(&resolved(BootMethod::GrubRescueIso));
        assert!(iso_tools.iter().any(|(tool, _)| tool == "grub-mkrescue"));

        let qcow_tools = required_tools(&resolved(BootMethod::GrubQcow2));
        assert!(qcow_tools.iter().any(|(tool, _)| tool == "qemu-img"));
    }
}
