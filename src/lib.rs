//! Configuration resolution and launch orchestration for booting guest
//! kernels under QEMU.
//!
//! boot-runner consumes a layered TOML configuration describing how to turn a
//! guest kernel into a bootable artifact and how to invoke the emulator
//! against it, across three boot methods (rescue ISO, direct kernel boot,
//! qcow2 disk boot) and named deployment schemes that may be gated to
//! specific architectures.
//!
//! # Architecture
//!
//! ```text
//! ConfigModel --resolve(context, scheme, arch)--> ResolvedConfig
//!     |                                               |
//!     |  base sections + [run]/[test] overlay         | plan(kernel, out_dir)
//!     |  + [[scheme]] overlay, expanded once          v
//!     |                                           LaunchPlan
//!     |                                               | execute
//!     |                                               v
//!     |                                  grub-mkrescue / qemu-img
//!     |                                  qemu-system-<arch> (exit status)
//! ```
//!
//! - [`config`] - Typed configuration model, TOML loading, scheme validation
//! - [`expand`] - `${VAR}` / `${VAR:-default}` / `$(cmd)` expansion
//! - [`resolve`] - Overlay merging, architecture gating, one-shot expansion
//! - [`plan`] - Boot-method dispatch into ordered build/invoke steps
//! - [`launch`] - Sequential plan execution, emulator spawn
//! - [`preflight`] - Host tool validation before launching

pub mod config;
pub mod expand;
pub mod launch;
pub mod plan;
pub mod preflight;
pub mod resolve;

pub use config::{ConfigError, ConfigModel, SchemeOverlay};
pub use expand::{expand, expand_env, ExpandError};
pub use launch::{execute, LaunchError};
pub use plan::{plan, LaunchPlan, PlanError, Step};
pub use resolve::{resolve, BootMethod, Context, GrubProtocol, ResolveError, ResolvedConfig};
