//! AFP connect tool.
//!
//! Probes an AFP server, or connects and logs in to it, and prints the
//! result as JSON on stdout. Logs go to stderr.

use afp_session::{
    ClientContext, ConnectRequest, Credentials, DsiTransport, Orchestrator, SessionRegistry,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod logging;

use config::ClientConfig;

/// Connect to an AFP file server
#[derive(Parser, Debug)]
#[command(name = "afp-connect", version, about = "Probe or log in to an AFP file server")]
struct Args {
    /// Server host name or address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// User name; omit for guest access
    #[arg(long)]
    user: Option<String>,

    /// Password
    #[arg(long)]
    password: Option<String>,

    /// Acceptable UAM by name, e.g. "Cleartxt Passwrd" (repeatable)
    #[arg(long)]
    uam: Vec<String>,

    /// Highest AFP version to negotiate, e.g. 3.1
    #[arg(long)]
    afp_version: Option<String>,

    /// Per-reply timeout, e.g. 5s
    #[arg(long)]
    reply_timeout: Option<humantime::Duration>,

    /// Only ask the server to describe itself
    #[arg(long)]
    probe_only: bool,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "afp.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Flags take precedence over the file and environment
    fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if !self.uam.is_empty() {
            config.uams = self.uam.clone();
        }
        if let Some(version) = &self.afp_version {
            config.afp_version = Some(version.clone());
        }
        if let Some(timeout) = self.reply_timeout {
            config.reply_timeout = timeout.to_string();
        }
    }
}

/// JSON document printed on stdout
#[derive(Serialize)]
struct Report<T: Serialize> {
    timestamp: DateTime<Local>,
    host: String,
    port: u16,
    #[serde(flatten)]
    result: T,
}

fn print_report<T: Serialize>(host: &str, port: u16, result: T) -> Result<()> {
    let report = Report {
        timestamp: Local::now(),
        host: host.to_string(),
        port,
        result,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    component_info!("cmd", "Starting afp-connect v{}", env!("CARGO_PKG_VERSION"));

    let mut client_config = ClientConfig::load_from_file(&args.config)?;
    args.apply_to(&mut client_config);

    let host = client_config
        .host
        .clone()
        .context("no server given; use --host, AFP_HOST or the config file")?;
    let port = client_config.port;
    let connect_config = client_config.connect_config()?;

    let orchestrator = Orchestrator::new(
        &connect_config,
        Arc::new(DsiTransport::new(&connect_config)),
        Arc::new(SessionRegistry::new()),
    );

    if args.probe_only {
        let probe = orchestrator
            .probe_only(&host, port)
            .await
            .with_context(|| format!("probe of {}:{} failed", host, port))?;
        return print_report(&host, port, probe);
    }

    let mut request = ConnectRequest::new(host.clone(), port)
        .with_credentials(Credentials::new(
            client_config.user.clone(),
            client_config.password.clone(),
        ))
        .with_context(ClientContext::new(format!("afp-connect {}", host)));
    if let Some(version) = client_config.requested_version()? {
        request = request.with_version(version);
    }
    if let Some(mask) = client_config.uam_mask()? {
        request = request.with_uam_mask(mask);
    }

    let session = match orchestrator.connect(&request).await {
        Ok(session) => session,
        Err(e) => {
            component_error!("cmd", "Connect to {}:{} failed: {}", host, port, e);
            return Err(e.into());
        }
    };

    print_report(&host, port, session.summary().await)?;

    orchestrator
        .disconnect(&session)
        .await
        .context("failed to close session")?;
    component_info!("cmd", "Disconnected from {}:{}", host, port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "afp-connect",
            "--host",
            "nas",
            "--uam",
            "DHX2",
            "--uam",
            "Cleartxt Passwrd",
            "--reply-timeout",
            "2s",
            "--afp-version",
            "3.0",
        ]);
        assert!(!args.probe_only);

        let mut config = ClientConfig {
            host: Some("from-file".to_string()),
            port: 10548,
            ..ClientConfig::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.host.as_deref(), Some("nas"));
        assert_eq!(config.port, 10548);
        assert_eq!(config.uams, vec!["DHX2", "Cleartxt Passwrd"]);
        assert_eq!(config.reply_timeout, "2s");
        assert_eq!(
            config.requested_version().unwrap(),
            Some(afp_wire::AfpVersion::V30)
        );
    }

    #[test]
    fn test_report_shape() {
        #[derive(Serialize)]
        struct Probe {
            machine_type: &'static str,
        }
        let report = Report {
            timestamp: Local::now(),
            host: "nas".to_string(),
            port: 548,
            result: Probe {
                machine_type: "Netatalk",
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["machine_type"], "Netatalk");
        assert_eq!(json["port"], 548);
        assert!(json["timestamp"].is_string());
    }
}
