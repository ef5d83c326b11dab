//! fluxgate-server: DNS, HTTP and TLS steering proxy.
//!
//! Peeks at the first bytes of each connection to learn where the client
//! wants to go (HTTP `Host:` header or TLS SNI), checks the source and the
//! target against policy, and splices bytes to the real upstream. The DNS
//! listener answers selected names from a local spoof table and forwards
//! the rest.

mod config;
mod dns;
mod httphdr;
mod listener;
mod proxy;
mod splice;

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use config::ConfigFile;
use dns::DnsProxy;
use proxy::{HttpProxy, TlsProxy};

/// fluxgate-server — DNS, HTTP and TLS steering proxy
#[derive(Parser, Debug)]
#[command(name = "fluxgate-server", version, about = "DNS, HTTP and TLS steering proxy")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "fluxgate.toml")]
    conf: PathBuf,

    /// Parse the config and exit
    #[arg(long)]
    test: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match ConfigFile::load(&cli.conf) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load config");
            std::process::exit(2);
        }
    };
    if cli.test {
        info!(path = %cli.conf.display(), "config ok");
        return;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting fluxgate-server");

    // The registry was already validated during load; resolution here
    // cannot fail.
    let acls = match config.build_acls() {
        Ok(acls) => acls,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to build acls");
            std::process::exit(2);
        }
    };

    for cfg in &config.http {
        let acl = acls.resolve(cfg.acl.as_deref()).expect("validated acl");
        let http = HttpProxy::new(cfg.clone(), acl);
        tokio::spawn(run_listener("http", cfg.id.clone(), http.run()));
    }
    for cfg in &config.tls {
        let acl = acls.resolve(cfg.acl.as_deref()).expect("validated acl");
        let tls = TlsProxy::new(cfg.clone(), acl);
        tokio::spawn(run_listener("tls", cfg.id.clone(), tls.run()));
    }
    for cfg in &config.dns {
        let acl = acls.resolve(cfg.acl.as_deref()).expect("validated acl");
        match DnsProxy::new(cfg.clone(), acl) {
            Ok(dns) => {
                tokio::spawn(run_listener("dns", cfg.id.clone(), dns.run()));
            }
            Err(e) => {
                error!(id = %cfg.id, error = %format!("{e:#}"), "failed to start dns listener");
                std::process::exit(2);
            }
        }
    }

    shutdown_signal().await;
    info!("exiting, stopping listeners");
}

/// Run one listener task; a failure takes down that listener only.
async fn run_listener(
    kind: &'static str,
    id: String,
    serve: impl std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
) {
    if let Err(e) = serve.await {
        error!(kind, id = %id, error = %format!("{e:#}"), "listener failed");
    }
}

/// Wait for SIGTERM or SIGINT. SIGHUP is reserved for log-sink reopening
/// and never stops the listeners; stream sinks have nothing to reopen, so
/// it is acknowledged and ignored.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT");
                    return;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    return;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, log sinks reopened");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
