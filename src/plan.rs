//! Launch-plan construction.
//!
//! `plan` maps a [`ResolvedConfig`]'s boot method onto an ordered list of
//! steps: at most one artifact-build step, then exactly one emulator
//! invocation. The kernel image path is an input here because the kernel is
//! produced by an external build collaborator (parameterized by
//! `build_features`, which this module forwards and never interprets).
//!
//! A plan is derived from exactly one ResolvedConfig and consumed once by the
//! executor.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::resolve::{BootMethod, GrubProtocol, ResolvedConfig};

const ISO_FILENAME: &str = "boot.iso";
const QCOW2_FILENAME: &str = "boot.qcow2";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("missing required artifact for '{method}': {what}")]
    MissingArtifact { method: BootMethod, what: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    RescueIso,
    Qcow2Disk,
}

/// One step of a launch plan.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    BuildArtifact {
        kind: ArtifactKind,
        kernel: PathBuf,
        initramfs: PathBuf,
        /// Guest kernel command line baked into the bootloader config.
        cmdline: String,
        protocol: GrubProtocol,
        mkrescue_path: String,
        output: PathBuf,
    },
    InvokeEmulator { argv: Vec<String> },
}

/// Ordered build/invoke steps for one resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub steps: Vec<Step>,
}

impl LaunchPlan {
    pub fn build_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|step| matches!(step, Step::BuildArtifact { .. }))
    }

    pub fn invocation(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|step| matches!(step, Step::InvokeEmulator { .. }))
    }
}

pub fn qemu_binary(arch: &str) -> String {
    format!("qemu-system-{arch}")
}

/// Build a launch plan for `resolved`, booting `kernel` with artifacts placed
/// under `out_dir`.
pub fn plan(resolved: &ResolvedConfig, kernel: &Path, out_dir: &Path) -> Result<LaunchPlan, PlanError> {
    if kernel.as_os_str().is_empty() {
        return Err(PlanError::MissingArtifact {
            method: resolved.boot_method,
            what: "kernel image path is empty".to_string(),
        });
    }
    if resolved.initramfs_path.as_os_str().is_empty() {
        return Err(PlanError::MissingArtifact {
            method: resolved.boot_method,
            what: "initramfs path is empty".to_string(),
        });
    }

    let cmdline = guest_cmdline(resolved);
    let mut argv = vec![qemu_binary(&resolved.arch)];
    argv.extend(resolved.qemu_args.split_whitespace().map(str::to_string));

    let steps = match resolved.boot_method {
        BootMethod::QemuDirect => {
            argv.push("-kernel".to_string());
            argv.push(kernel.display().to_string());
            argv.push("-initrd".to_string());
            argv.push(resolved.initramfs_path.display().to_string());
            argv.push("-append".to_string());
            argv.push(cmdline);
            vec![Step::InvokeEmulator { argv }]
        }
        BootMethod::GrubRescueIso => {
            let output = out_dir.join(ISO_FILENAME);
            argv.push("-cdrom".to_string());
            argv.push(output.display().to_string());
            vec![
                build_step(ArtifactKind::RescueIso, resolved, kernel, cmdline, output),
                Step::InvokeEmulator { argv },
            ]
        }
        BootMethod::GrubQcow2 => {
            let output = out_dir.join(QCOW2_FILENAME);
            argv.push("-drive".to_string());
            argv.push(format!(
                "file={},format=qcow2,if=virtio",
                output.display()
            ));
            vec![
                build_step(ArtifactKind::Qcow2Disk, resolved, kernel, cmdline, output),
                Step::InvokeEmulator { argv },
            ]
        }
    };

    Ok(LaunchPlan { steps })
}

fn build_step(
    kind: ArtifactKind,
    resolved: &ResolvedConfig,
    kernel: &Path,
    cmdline: String,
    output: PathBuf,
) -> Step {
    Step::BuildArtifact {
        kind,
        kernel: kernel.to_path_buf(),
        initramfs: resolved.initramfs_path.clone(),
        cmdline,
        protocol: resolved.grub_protocol,
        mkrescue_path: resolved.grub_mkrescue_path.clone(),
        output,
    }
}

/// Assemble the guest kernel command line: kernel args, the `init=` entry,
/// then init args after a `--` separator.
fn guest_cmdline(resolved: &ResolvedConfig) -> String {
    let mut parts = resolved.kcmd_args.clone();
    parts.push(format!("init={}", resolved.init_path));
    if !resolved.init_args.is_empty() {
        parts.push("--".to_string());
        parts.extend(resolved.init_args.iter().cloned());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn resolved(method: BootMethod) -> ResolvedConfig {
        ResolvedConfig {
            boot_method: method,
            grub_protocol: GrubProtocol::Multiboot2,
            grub_mkrescue_path: "grub-mkrescue".to_string(),
            qemu_args: "-m 4G -display none".to_string(),
            kcmd_args: vec!["console=ttyS0".to_string()],
            init_path: "/usr/bin/busybox".to_string(),
            init_args: vec!["sh".to_string()],
            initramfs_path: PathBuf::from("build/initramfs.cpio.gz"),
            build_features: BTreeSet::new(),
            arch: "x86_64".to_string(),
        }
    }

    #[test]
    fn direct_boot_has_no_build_step() {
        let plan = plan(
            &resolved(BootMethod::QemuDirect),
            Path::new("build/kernel"),
            Path::new("out"),
        )
        .unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert!(plan.build_step().is_none());
        let Some(Step::InvokeEmulator { argv }) = plan.invocation() else {
            panic!("expected an invocation step");
        };
        assert_eq!(argv[0], "qemu-system-x86_64");
        assert!(argv.contains(&"-kernel".to_string()));
        assert!(argv.contains(&"-initrd".to_string()));
        let append = argv.iter().position(|a| a == "-append").unwrap();
        assert_eq!(argv[append + 1], "console=ttyS0 init=/usr/bin/busybox -- sh");
    }

    #[test]
    fn rescue_iso_builds_then_invokes() {
        let plan = plan(
            &resolved(BootMethod::GrubRescueIso),
            Path::new("build/kernel"),
            Path::new("out"),
        )
        .unwrap();

        assert_eq!(plan.steps.len(), 2);
        let Step::BuildArtifact { kind, output, cmdline, .. } = &plan.steps[0] else {
            panic!("expected the build step first");
        };
        assert_eq!(*kind, ArtifactKind::RescueIso);
        assert!(cmdline.contains("init=/usr/bin/busybox"));

        // The invocation references the build output.
        let Step::InvokeEmulator { argv } = &plan.steps[1] else {
            panic!("expected the invocation step second");
        };
        let cdrom = argv.iter().position(|a| a == "-cdrom").unwrap();
        assert_eq!(argv[cdrom + 1], output.display().to_string());
    }

    #[test]
    fn qcow2_attaches_disk_as_block_device() {
        let plan = plan(
            &resolved(BootMethod::GrubQcow2),
            Path::new("build/kernel"),
            Path::new("out"),
        )
        .unwrap();

        let Step::BuildArtifact { kind, output, .. } = &plan.steps[0] else {
            panic!("expected the build step first");
        };
        assert_eq!(*kind, ArtifactKind::Qcow2Disk);

        let Step::InvokeEmulator { argv } = &plan.steps[1] else {
            panic!("expected the invocation step second");
        };
        let drive = argv.iter().position(|a| a == "-drive").unwrap();
        assert_eq!(
            argv[drive + 1],
            format!("file={},format=qcow2,if=virtio", output.display())
        );
    }

    #[test]
    fn empty_initramfs_is_missing_artifact() {
        let mut config = resolved(BootMethod::GrubRescueIso);
        config.initramfs_path = PathBuf::new();
        let err = plan(&config, Path::new("build/kernel"), Path::new("out")).unwrap_err();
        assert!(matches!(err, PlanError::MissingArtifact { .. }));
    }

    #[test]
    fn empty_kernel_is_missing_artifact() {
        let config = resolved(BootMethod::QemuDirect);
        let err = plan(&config, Path::new(""), Path::new("out")).unwrap_err();
        assert!(matches!(err, PlanError::MissingArtifact { .. }));
    }

    #[test]
    fn every_plan_has_exactly_one_invocation() {
        for method in [
            BootMethod::QemuDirect,
            BootMethod::GrubRescueIso,
            BootMethod::GrubQcow2,
        ] {
            let plan = plan(&resolved(method), Path::new("build/kernel"), Path::new("out")).unwrap();
            let invocations = plan
                .steps
                .iter()
                .filter(|step| matches!(step, Step::InvokeEmulator { .. }))
                .count();
            assert_eq!(invocations, 1, "method {method}");
        }
    }

    #[test]
    fn cmdline_omits_separator_without_init_args() {
        let mut config = resolved(BootMethod::QemuDirect);
        config.init_args.clear();
        let plan = plan(&config, Path::new("build/kernel"), Path::new("out")).unwrap();
        let Some(Step::InvokeEmulator { argv }) = plan.invocation() else {
            panic!("expected an invocation step");
        };
        let append = argv.iter().position(|a| a == "-append").unwrap();
        assert_eq!(argv[append + 1], "console=ttyS0 init=/usr/bin/busybox");
    }
}
