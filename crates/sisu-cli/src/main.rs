//! Sisu CLI - mount AWS resources as a local filesystem
//!
//! Usage:
//!   sisu                      # Mount and open an interactive shell
//!   sisu --background         # Mount and stay up until signalled
//!   sisu stop                 # Unmount a background mount

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sisu - browse AWS resources as a filesystem
#[derive(Parser, Debug)]
#[command(name = "sisu")]
#[command(author, version, about)]
#[command(
    long_about = "sisu mounts your AWS resources (S3, SSM, IAM, ...) as a local filesystem.\n\n\
                  Simply run 'sisu' to mount and open an interactive shell.\n\
                  Use standard commands like ls, cd, cat to browse your resources.\n\
                  Type 'exit' to unmount and return to your original shell."
)]
struct Args {
    /// AWS profile to browse (default: every configured profile)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region to browse (default: a fixed set of common regions)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom mount point (default: ~/.sisu/mnt)
    #[arg(long, global = true)]
    mountpoint: Option<PathBuf>,

    /// Run in background (daemon mode)
    #[arg(long)]
    background: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unmount a background sisu mount
    Stop,
}

fn default_mountpoint() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".sisu").join("mnt"),
        None => PathBuf::from("/tmp/sisu"),
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "sisu=debug,sisu_cli=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    match args.command {
        Some(Command::Stop) => stop(&args),
        None => run(&args).await,
    }
}

async fn run(args: &Args) -> Result<()> {
    let mountpoint = args.mountpoint.clone().unwrap_or_else(default_mountpoint);

    std::fs::create_dir_all(&mountpoint)
        .with_context(|| format!("failed to create mountpoint {}", mountpoint.display()))?;

    if is_mounted(&mountpoint) {
        bail!(
            "already mounted at {}, run 'sisu stop' first",
            mountpoint.display()
        );
    }

    println!("Mounting AWS resources to {}...", mountpoint.display());
    if let Some(profile) = &args.profile {
        println!("Using profile: {profile}");
    }
    if let Some(region) = &args.region {
        println!("Region: {region}");
    }

    let profiles = match &args.profile {
        Some(profile) => vec![profile.clone()],
        None => sisu::config::load_profiles(),
    };
    let regions = match &args.region {
        Some(region) => vec![region.clone()],
        None => Vec::new(),
    };

    let engine = Arc::new(sisu::fs::Engine::new(profiles, regions));
    let session = sisu::fs::mount(engine, tokio::runtime::Handle::current(), &mountpoint)
        .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;

    if args.background {
        println!("\nMounted! Run 'sisu stop' to unmount.");
        println!("Mount point: {}", mountpoint.display());

        let pid_file = pid_file_path(&mountpoint);
        std::fs::write(&pid_file, std::process::id().to_string())
            .context("failed to write pid file")?;

        wait_for_shutdown().await;

        println!("\nUnmounting...");
        session.unmount();
        let _ = std::fs::remove_file(&pid_file);
    } else {
        println!("\nMounted! Opening new shell. Type 'exit' to unmount.\n");

        if let Err(err) = spawn_shell(&mountpoint) {
            eprintln!("Shell error: {err}");
        }

        println!("\nUnmounting...");
        session.unmount();
        println!("Done.");
    }

    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/// Drop the user into an interactive shell rooted at the mount.
fn spawn_shell(mountpoint: &Path) -> std::io::Result<()> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let mut command = if shell.contains("zsh") {
        // zsh ignores PS1 from the environment; set the prompt in-shell.
        let script = format!(
            "PROMPT='sisu:%~ $ '\ncd {}\nexec {} -i",
            mountpoint.display(),
            shell
        );
        let mut command = std::process::Command::new(&shell);
        command.arg("-c").arg(script);
        command
    } else {
        let mut command = std::process::Command::new(&shell);
        command
            .arg("--rcfile")
            .arg("/dev/null")
            .arg("-i")
            .current_dir(mountpoint)
            .env("PS1", "sisu:\\w $ ");
        command
    };

    command
        .env("SISU_MOUNT", mountpoint.as_os_str())
        .status()
        .map(|_| ())
}

fn stop(args: &Args) -> Result<()> {
    let mountpoint = args.mountpoint.clone().unwrap_or_else(default_mountpoint);
    let pid_file = pid_file_path(&mountpoint);

    let Ok(pid_text) = std::fs::read_to_string(&pid_file) else {
        if is_mounted(&mountpoint) {
            return unmount_direct(&mountpoint);
        }
        bail!("no sisu mount found at {}", mountpoint.display());
    };

    let Ok(pid) = pid_text.trim().parse::<i32>() else {
        return unmount_direct(&mountpoint);
    };

    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return unmount_direct(&mountpoint);
    }

    println!("Unmount signal sent.");
    Ok(())
}

/// Pid file lives next to the mount point, not inside it.
fn pid_file_path(mountpoint: &Path) -> PathBuf {
    match mountpoint.parent() {
        Some(parent) => parent.join("sisu.pid"),
        None => PathBuf::from("sisu.pid"),
    }
}

fn is_mounted(mountpoint: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let target = mountpoint.to_string_lossy();
    mounts
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(target.as_ref()))
}

fn unmount_direct(mountpoint: &Path) -> Result<()> {
    let status = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .status()
        .context("failed to run fusermount")?;
    if !status.success() {
        bail!("failed to unmount {}", mountpoint.display());
    }
    println!("Unmounted {}", mountpoint.display());
    Ok(())
}
