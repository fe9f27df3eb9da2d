//! devd - hotplug device manager daemon.
//!
//! Runs the single-threaded receive loop: poll the uevent socket, drain
//! it, repeat. `--firmware-child` starts the context that answers only
//! firmware requests (spawning and supervising that child is the init
//! system's job, not ours).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::info;
use tracing_subscriber::EnvFilter;

use devd_daemon::config::DevdConfig;
use devd_daemon::manager::{DeviceManager, ManagerRole};
use devd_daemon::modload::NullModuleLoader;
use devd_daemon::selinux::NullLabelPolicy;

/// devd - hotplug device manager
#[derive(Parser, Debug)]
#[command(name = "devd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Handle firmware events only (run as the firmware child context).
    #[arg(long)]
    firmware_child: bool,

    /// Perform coldboot and exit instead of entering the receive loop.
    #[arg(long)]
    coldboot_only: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DevdConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DevdConfig::default(),
    };

    let role = if args.firmware_child {
        ManagerRole::FirmwareChild
    } else {
        ManagerRole::Parent
    };

    let perms = config.permission_store();
    let mut manager = DeviceManager::new(
        config,
        perms,
        Box::new(NullLabelPolicy),
        Box::new(NullModuleLoader),
        role,
    );

    manager.device_init();
    if args.coldboot_only {
        return Ok(());
    }

    info!(?role, "entering uevent receive loop");
    loop {
        {
            let fd = manager
                .socket_fd()
                .context("uevent socket unavailable; cannot run the receive loop")?;
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(err).context("polling uevent socket"),
            }
        }
        manager.drain_socket();
    }
}
