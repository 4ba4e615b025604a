//! Launch-plan execution.
//!
//! Interprets the steps of a [`LaunchPlan`] strictly in order: the artifact
//! build (when present) must complete successfully before the emulator is
//! spawned, since the invocation consumes the build output. The emulator's
//! exit status is returned verbatim to the caller; nothing here retries a
//! failed step.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

use crate::plan::{ArtifactKind, LaunchPlan, Step};
use crate::resolve::GrubProtocol;

const ISO_ROOT_DIRNAME: &str = "iso-root";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("staging boot artifact ({what}): {cause}")]
    Stage {
        what: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("build tool '{tool}' could not be spawned: {cause}")]
    Spawn {
        tool: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("build tool '{tool}' exited with {status}: {stderr}")]
    BuildFailed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("build step finished but produced no artifact at '{path}'")]
    MissingArtifact { path: PathBuf },

    #[error("emulator '{tool}' could not be spawned: {cause}")]
    EmulatorSpawn {
        tool: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("launch plan has no emulator invocation step")]
    NoInvocation,
}

/// Execute a launch plan and return the emulator's exit status.
pub fn execute(plan: &LaunchPlan) -> Result<ExitStatus, LaunchError> {
    for step in &plan.steps {
        match step {
            Step::BuildArtifact {
                kind,
                kernel,
                initramfs,
                cmdline,
                protocol,
                mkrescue_path,
                output,
            } => {
                build_artifact(
                    *kind,
                    kernel,
                    initramfs,
                    cmdline,
                    *protocol,
                    mkrescue_path,
                    output,
                )?;
            }
            Step::InvokeEmulator { argv } => {
                return invoke_emulator(argv);
            }
        }
    }
    Err(LaunchError::NoInvocation)
}

#[allow(clippy::too_many_arguments)]
fn build_artifact(
    kind: ArtifactKind,
    kernel: &Path,
    initramfs: &Path,
    cmdline: &str,
    protocol: GrubProtocol,
    mkrescue_path: &str,
    output: &Path,
) -> Result<(), LaunchError> {
    let parent = output.parent().unwrap_or(Path::new("."));
    let iso_root = parent.join(ISO_ROOT_DIRNAME);
    stage_iso_tree(&iso_root, kernel, initramfs, cmdline, protocol)?;

    // The qcow2 method goes through the same rescue-image path and converts
    // the result into a disk image.
    let iso_path = match kind {
        ArtifactKind::RescueIso => output.to_path_buf(),
        ArtifactKind::Qcow2Disk => output.with_extension("iso"),
    };

    run_build_tool(
        mkrescue_path,
        &[
            "-o".to_string(),
            iso_path.display().to_string(),
            iso_root.display().to_string(),
        ],
    )?;

    if kind == ArtifactKind::Qcow2Disk {
        run_build_tool(
            "qemu-img",
            &[
                "convert".to_string(),
                "-O".to_string(),
                "qcow2".to_string(),
                iso_path.display().to_string(),
                output.display().to_string(),
            ],
        )?;
    }

    if !output.is_file() {
        return Err(LaunchError::MissingArtifact {
            path: output.to_path_buf(),
        });
    }
    Ok(())
}

/// Lay out the ISO staging tree: the kernel and initramfs under `boot/` and
/// a GRUB config with the handoff entry for the selected protocol.
fn stage_iso_tree(
    iso_root: &Path,
    kernel: &Path,
    initramfs: &Path,
    cmdline: &str,
    protocol: GrubProtocol,
) -> Result<(), LaunchError> {
    let grub_dir = iso_root.join("boot/grub");
    fs::create_dir_all(&grub_dir).map_err(|cause| LaunchError::Stage {
        what: format!("creating '{}'", grub_dir.display()),
        cause,
    })?;

    copy_into(kernel, &iso_root.join("boot/kernel"))?;
    copy_into(initramfs, &iso_root.join("boot/initramfs"))?;

    let grub_cfg = grub_config(cmdline, protocol);
    let cfg_path = grub_dir.join("grub.cfg");
    fs::write(&cfg_path, grub_cfg).map_err(|cause| LaunchError::Stage {
        what: format!("writing '{}'", cfg_path.display()),
        cause,
    })?;

    Ok(())
}

fn copy_into(source: &Path, destination: &Path) -> Result<(), LaunchError> {
    fs::copy(source, destination)
        .map(|_| ())
        .map_err(|cause| LaunchError::Stage {
            what: format!(
                "copying '{}' to '{}'",
                source.display(),
                destination.display()
            ),
            cause,
        })
}

fn grub_config(cmdline: &str, protocol: GrubProtocol) -> String {
    let entry = match protocol {
        GrubProtocol::Multiboot2 => format!(
            "    multiboot2 /boot/kernel {cmdline}\n    module2 --nounzip /boot/initramfs\n"
        ),
        GrubProtocol::Linux => {
            format!("    linux /boot/kernel {cmdline}\n    initrd /boot/initramfs\n")
        }
    };
    format!(
        "set timeout=0\nset default=0\n\nmenuentry 'guest kernel' {{\n{entry}    boot\n}}\n"
    )
}

fn run_build_tool(tool: &str, args: &[String]) -> Result<(), LaunchError> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|cause| LaunchError::Spawn {
            tool: tool.to_string(),
            cause,
        })?;

    if !output.status.success() {
        return Err(LaunchError::BuildFailed {
            tool: tool.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn invoke_emulator(argv: &[String]) -> Result<ExitStatus, LaunchError> {
    let Some((tool, args)) = argv.split_first() else {
        return Err(LaunchError::NoInvocation);
    };
    Command::new(tool)
        .args(args)
        .status()
        .map_err(|cause| LaunchError::EmulatorSpawn {
            tool: tool.to_string(),
            cause,
        })
}
