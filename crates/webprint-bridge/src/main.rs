//! Web print bridge: entry point.
//!
//! Runs a loopback HTTP server that web pages reach through the
//! `/printwindow` relay page.  After the user agrees to a site's first
//! request, that site may list and use local printers, serial ports and
//! raw socket printers.
//!
//! # Usage
//!
//! ```text
//! webprint-bridge [OPTIONS] [COMMAND]
//!
//! Commands:
//!   serve               Run the bridge (default)
//!   acl list            Print the sites that have been granted access
//!   acl revoke <ORIGIN> Withdraw a site's access
//!
//! Options:
//!   --data-dir <DIR>    Directory for settings and grants
//!   --bind <ADDR>       Address to listen on
//!   --port <PORT>       Port to listen on
//!   --save-address      Remember the resolved address for the next start
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable            | Description                                  |
//! |---------------------|----------------------------------------------|
//! | `WEBPRINT_DATA_DIR` | data directory (default: platform config dir)|
//! | `WEBPRINT_BIND`     | listen address (default: `webprint.config`)  |
//! | `WEBPRINT_PORT`     | listen port (default: `webprint.config`)     |
//! | `RUST_LOG`          | log filter (default: `settings.toml` level)  |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use webprint_bridge::application::{AccessControl, Devices, Dispatcher};
use webprint_bridge::infrastructure::consent::{build_prompt, DenyPrompt};
use webprint_bridge::infrastructure::printing::{system_spooler, NetworkPrinter};
use webprint_bridge::infrastructure::serial::SystemSerialBackend;
use webprint_bridge::infrastructure::storage::{
    load_bind_addr, load_settings, parse_bind_addr, save_bind_addr, DataDir, JsonGrantStore, Settings,
};
use webprint_bridge::infrastructure::BridgeServer;
use webprint_core::EscPosRasterEncoder;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Local bridge between web pages and printers or serial devices.
#[derive(Debug, Parser)]
#[command(
    name = "webprint-bridge",
    about = "Loopback bridge that lets consenting web pages print raw commands",
    version
)]
struct Cli {
    /// Directory holding `settings.toml`, `webprint.config` and the grants.
    #[arg(long, env = "WEBPRINT_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// IP address to listen on.  Overrides the saved address.
    #[arg(long, env = "WEBPRINT_BIND")]
    bind: Option<String>,

    /// Port to listen on.  Overrides the saved port.
    #[arg(long, env = "WEBPRINT_PORT")]
    port: Option<u16>,

    /// Write the resolved `address:port` to `webprint.config`.
    #[arg(long)]
    save_address: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Run the bridge until Ctrl+C.
    Serve,
    /// Inspect or withdraw site grants.
    Acl {
        #[command(subcommand)]
        action: AclCommand,
    },
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum AclCommand {
    /// Print every origin that holds a grant.
    List,
    /// Withdraw the grant of one origin.
    Revoke { origin: String },
}

impl Cli {
    /// Overlays `--bind` and `--port` on the saved address.
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not an IP address or `localhost`.
    fn resolve_bind(&self, saved: SocketAddr) -> anyhow::Result<SocketAddr> {
        let host = match &self.bind {
            Some(bind) => bind.clone(),
            None => saved.ip().to_string(),
        };
        let port = self.port.unwrap_or(saved.port());
        parse_bind_addr(&format!("{host}:{port}"))
            .with_context(|| format!("invalid bind address '{host}' (port {port})"))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// How long exit waits for blocking work (a consent prompt reading stdin,
/// a device call) that outlived the server.
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = DataDir::resolve(cli.data_dir.clone())?;
    let settings = load_settings(&data_dir.settings_file())?;

    // `RUST_LOG` wins; otherwise the level from settings.toml.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.bridge.log_level)),
        )
        .init();

    match &cli.command {
        None | Some(Command::Serve) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
            let result = runtime.block_on(serve(&cli, data_dir, settings));
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
            result
        }
        Some(Command::Acl { action }) => manage_grants(&data_dir, action),
    }
}

async fn serve(cli: &Cli, data_dir: DataDir, settings: Settings) -> anyhow::Result<()> {
    let saved = load_bind_addr(&data_dir.bind_file())?;
    let bind_addr = cli.resolve_bind(saved)?;
    if cli.save_address {
        save_bind_addr(&data_dir.bind_file(), bind_addr)?;
    }

    let config = Arc::new(settings.into_config(bind_addr, data_dir.root().to_path_buf())?);
    info!(
        data_dir = %data_dir.root().display(),
        charset = %config.charset,
        serial = %config.serial_defaults,
        "web print bridge starting"
    );

    let store = Arc::new(JsonGrantStore::new(data_dir.acl_file()));
    let access = Arc::new(AccessControl::open(store, build_prompt(&config.consent))?);
    let devices = Devices {
        spooler: system_spooler(),
        serial: Arc::new(SystemSerialBackend),
        sockets: Arc::new(NetworkPrinter::new(config.socket_timeout)),
        images: Arc::new(EscPosRasterEncoder::default()),
    };
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&config), access, devices));

    let mut server = BridgeServer::new(dispatcher, config.max_body_bytes);
    server.start(config.bind_addr).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");

    server.stop().await
}

fn manage_grants(data_dir: &DataDir, action: &AclCommand) -> anyhow::Result<()> {
    let store = Arc::new(JsonGrantStore::new(data_dir.acl_file()));
    let access = AccessControl::open(store, Arc::new(DenyPrompt))?;

    match action {
        AclCommand::List => {
            for origin in access.list() {
                println!("{origin}");
            }
        }
        AclCommand::Revoke { origin } => {
            if access.revoke(origin)? {
                println!("revoked {origin}");
            } else {
                println!("{origin} has no grant");
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
