//! Chatline CLI.
//!
//! `config` prints the resolved configuration. `demo` drives a full session
//! lifecycle against the in-process loopback server: connect, echo traffic,
//! an optional forced stream drop with automatic restart, and stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use chatline::config::{self, ChatlineConfig};
use chatline::credentials::{self, Credentials};
use chatline::provider::loopback::LoopbackProvider;
use chatline::session::{InboundMessage, ReconnectPolicy, SessionListener, SessionManager};

#[derive(Debug, Parser)]
#[command(name = "chatline", version, about = "Presence-oriented chat session client")]
struct Cli {
    /// Config file (defaults to $CHATLINE_CONFIG_PATH or ~/.chatline/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved configuration as TOML.
    Config,
    /// Run a session against the in-process loopback server.
    Demo {
        /// Messages to send and wait for.
        #[arg(long, default_value_t = 3)]
        messages: u32,
        /// Sever the stream once to exercise automatic restart.
        #[arg(long)]
        drop_stream: bool,
        /// Override the first restart delay, in seconds.
        #[arg(long)]
        reconnect_delay_secs: Option<u64>,
    },
}

/// Listener that reports activity on the console.
struct ConsoleListener;

#[async_trait]
impl SessionListener for ConsoleListener {
    async fn receive_message(&self, message: InboundMessage) {
        println!(
            "<{}> [{}] {}",
            message.from.bare,
            message.from.resource_or_empty(),
            message.body
        );
    }

    async fn on_connected(&self) {
        println!("* connected");
    }

    async fn on_disconnected(&self) {
        println!("* disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = |key: &str| std::env::var(key).ok();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => config::config_path_with(env)?,
    };
    let mut config = ChatlineConfig::load_from(&config_path)?;
    config.apply_overrides(env);

    let _guard = chatline::logging::init(&config.logging)?;

    match cli.command {
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("# {}", config_path.display());
            print!("{rendered}");
            Ok(())
        }
        Command::Demo {
            messages,
            drop_stream,
            reconnect_delay_secs,
        } => {
            run_demo(
                &config,
                &config_path,
                messages,
                drop_stream,
                reconnect_delay_secs,
            )
            .await
        }
    }
}

async fn run_demo(
    config: &ChatlineConfig,
    config_path: &std::path::Path,
    messages: u32,
    drop_stream: bool,
    reconnect_delay_secs: Option<u64>,
) -> Result<()> {
    let server = non_empty_or(&config.account.server, "loopback.local");
    let username = non_empty_or(&config.account.username, "demo@loopback.local");
    let secrets = config::secrets_path_for(config_path);
    let password = credentials::resolve_password(
        &config.account.password_env,
        |key| std::env::var(key).ok(),
        Some(secrets.as_path()),
    )
    .unwrap_or_else(|e| {
        warn!(error = %e, "no password configured, loopback accepts any");
        String::new()
    });

    let mut options = config.session_options();
    if let Some(secs) = reconnect_delay_secs {
        options.reconnect = ReconnectPolicy::fixed(Duration::from_secs(secs));
    }
    let restart_wait = options
        .reconnect
        .delay_for(1)
        .unwrap_or_default()
        .saturating_add(Duration::from_secs(1));

    let provider = LoopbackProvider::new();
    provider.echo(true);
    // Refuse direct TLS so the demo shows one fallback step.
    provider.accept_when(|posture| !posture.require_tls);

    let manager = SessionManager::with_options(
        Credentials::new(server, username, password),
        Arc::new(provider.clone()),
        options,
    );
    manager.set_listener(Arc::new(ConsoleListener));

    manager.start().await.context("demo session failed to start")?;
    info!(posture = ?manager.connected_posture(), "demo session up");

    let peer = format!("echo@{server}");
    exchange(&manager, &peer, messages).await?;

    if drop_stream {
        println!("* severing stream, restart in ~{}s", restart_wait.as_secs());
        provider.sever();
        tokio::time::sleep(restart_wait).await;
        if manager.is_running() {
            exchange(&manager, &peer, 1).await?;
        } else {
            warn!("session did not come back within the restart window");
        }
    }

    let status = serde_json::to_string_pretty(&manager.status())
        .context("failed to render session status")?;
    println!("{status}");

    manager.stop().await;
    Ok(())
}

async fn exchange(manager: &SessionManager, peer: &str, count: u32) -> Result<()> {
    let mut inbound = manager.subscribe();
    for n in 1..=count {
        manager
            .send_message(peer, &format!("ping {n}"))
            .await
            .context("send failed")?;
        tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .context("no echo received")?
            .context("inbound stream closed")?;
    }
    Ok(())
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
