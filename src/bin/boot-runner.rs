use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use boot_runner::config::{ConfigError, ConfigModel};
use boot_runner::expand::ExpandError;
use boot_runner::launch::LaunchError;
use boot_runner::plan::PlanError;
use boot_runner::resolve::{resolve, Context, ResolveError};
use boot_runner::{launch, plan, preflight};

const DEFAULT_OUT_DIR: &str = ".artifacts/boot";

// Each error kind maps to its own exit status so scripted callers can branch
// on the failure class. A successfully spawned emulator's own exit code is
// passed through unchanged.
const EXIT_USAGE: i32 = 2;
const EXIT_DUPLICATE_SCHEME: i32 = 10;
const EXIT_UNKNOWN_SCHEME: i32 = 11;
const EXIT_UNSUPPORTED_ARCH: i32 = 12;
const EXIT_INVALID_BOOT_METHOD: i32 = 13;
const EXIT_INVALID_GRUB_PROTOCOL: i32 = 14;
const EXIT_EXPANSION: i32 = 15;
const EXIT_MISSING_ARTIFACT: i32 = 16;
const EXIT_BUILD_FAILED: i32 = 17;
const EXIT_SPAWN: i32 = 18;

fn usage() -> &'static str {
    "Usage:\n  boot-runner run <config.toml> --kernel PATH [--scheme NAME] [--arch ARCH] [--out DIR]\n  boot-runner test <config.toml> --kernel PATH [--scheme NAME] [--arch ARCH] [--out DIR]\n  boot-runner plan <run|test> <config.toml> --kernel PATH [--scheme NAME] [--arch ARCH] [--out DIR]\n  boot-runner preflight <run|test> <config.toml> [--scheme NAME] [--arch ARCH]"
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(args: &[String]) -> Result<i32> {
    match args.split_first() {
        Some((cmd, rest)) if cmd == "run" => launch_cmd(Context::Run, rest),
        Some((cmd, rest)) if cmd == "test" => launch_cmd(Context::Test, rest),
        Some((cmd, rest)) if cmd == "plan" => plan_cmd(rest),
        Some((cmd, rest)) if cmd == "preflight" => preflight_cmd(rest),
        _ => bail!(usage()),
    }
}

struct Opts {
    config: PathBuf,
    scheme: Option<String>,
    arch: String,
    kernel: PathBuf,
    out_dir: PathBuf,
}

fn parse_opts(args: &[String], kernel_required: bool) -> Result<Opts> {
    let mut config = None;
    let mut scheme = None;
    let mut arch = None;
    let mut kernel = None;
    let mut out_dir = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--scheme" => scheme = Some(flag_value(&mut iter, "--scheme")?),
            "--arch" => arch = Some(flag_value(&mut iter, "--arch")?),
            "--kernel" => kernel = Some(PathBuf::from(flag_value(&mut iter, "--kernel")?)),
            "--out" => out_dir = Some(PathBuf::from(flag_value(&mut iter, "--out")?)),
            other if other.starts_with('-') => {
                bail!("unknown flag '{}'\n{}", other, usage())
            }
            other => {
                if config.is_some() {
                    bail!("unexpected argument '{}'\n{}", other, usage());
                }
                config = Some(PathBuf::from(other));
            }
        }
    }

    let Some(config) = config else {
        bail!("missing config path\n{}", usage());
    };
    let kernel = match kernel {
        Some(kernel) => kernel,
        None if kernel_required => bail!("missing --kernel PATH\n{}", usage()),
        None => PathBuf::new(),
    };

    Ok(Opts {
        config,
        scheme,
        arch: arch.unwrap_or_else(|| std::env::consts::ARCH.to_string()),
        kernel,
        out_dir: out_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
    })
}

fn flag_value<'a, I>(iter: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = &'a String>,
{
    match iter.next() {
        Some(value) => Ok(value.clone()),
        None => bail!("{} requires a value\n{}", flag, usage()),
    }
}

fn parse_context(value: &str) -> Result<Context> {
    match value {
        "run" => Ok(Context::Run),
        "test" => Ok(Context::Test),
        other => bail!("unknown context '{}'; expected 'run' or 'test'", other),
    }
}

fn launch_cmd(context: Context, args: &[String]) -> Result<i32> {
    let opts = parse_opts(args, true)?;
    let model = ConfigModel::load(&opts.config)?;
    let resolved = resolve(&model, context, opts.scheme.as_deref(), &opts.arch)?;
    preflight::check_host_tools(&resolved)?;

    println!(
        "[boot:{}] method {} on {}{}",
        context.as_str(),
        resolved.boot_method,
        resolved.arch,
        match &opts.scheme {
            Some(scheme) => format!(" (scheme {scheme})"),
            None => String::new(),
        }
    );

    let launch_plan = plan::plan(&resolved, &opts.kernel, &opts.out_dir)?;
    fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("creating output directory '{}'", opts.out_dir.display()))?;

    let status = launch::execute(&launch_plan)?;
    println!("[boot:{}] emulator exited with {}", context.as_str(), status);
    Ok(status.code().unwrap_or(1))
}

fn plan_cmd(args: &[String]) -> Result<i32> {
    let Some((context_arg, rest)) = args.split_first() else {
        bail!(usage());
    };
    let context = parse_context(context_arg)?;
    let opts = parse_opts(rest, true)?;

    let model = ConfigModel::load(&opts.config)?;
    let resolved = resolve(&model, context, opts.scheme.as_deref(), &opts.arch)?;
    let launch_plan = plan::plan(&resolved, &opts.kernel, &opts.out_dir)?;

    let rendered =
        serde_json::to_string_pretty(&launch_plan).context("serializing launch plan")?;
    println!("{rendered}");
    Ok(0)
}

fn preflight_cmd(args: &[String]) -> Result<i32> {
    let Some((context_arg, rest)) = args.split_first() else {
        bail!(usage());
    };
    let context = parse_context(context_arg)?;
    let opts = parse_opts(rest, false)?;

    let model = ConfigModel::load(&opts.config)?;
    let resolved = resolve(&model, context, opts.scheme.as_deref(), &opts.arch)?;
    preflight::check_host_tools(&resolved)?;
    println!(
        "[boot:{}] host tools present for method {}",
        context.as_str(),
        resolved.boot_method
    );
    Ok(0)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(config) = cause.downcast_ref::<ConfigError>() {
            return match config {
                ConfigError::DuplicateScheme { .. } => EXIT_DUPLICATE_SCHEME,
                _ => EXIT_USAGE,
            };
        }
        if let Some(resolve) = cause.downcast_ref::<ResolveError>() {
            return match resolve {
                ResolveError::UnknownScheme(_) => EXIT_UNKNOWN_SCHEME,
                ResolveError::UnsupportedArchitecture { .. } => EXIT_UNSUPPORTED_ARCH,
                ResolveError::InvalidBootMethod(_) => EXIT_INVALID_BOOT_METHOD,
                ResolveError::InvalidGrubProtocol(_) => EXIT_INVALID_GRUB_PROTOCOL,
                ResolveError::Expand(_) => EXIT_EXPANSION,
            };
        }
        if cause.downcast_ref::<ExpandError>().is_some() {
            return EXIT_EXPANSION;
        }
        if cause.downcast_ref::<PlanError>().is_some() {
            return EXIT_MISSING_ARTIFACT;
        }
        if let Some(launch) = cause.downcast_ref::<LaunchError>() {
            return match launch {
                LaunchError::MissingArtifact { .. } => EXIT_MISSING_ARTIFACT,
                LaunchError::Stage { .. } | LaunchError::BuildFailed { .. } => EXIT_BUILD_FAILED,
                LaunchError::Spawn { .. } | LaunchError::EmulatorSpawn { .. } => EXIT_SPAWN,
                LaunchError::NoInvocation => EXIT_USAGE,
            };
        }
    }
    EXIT_USAGE
}
