// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use gitsnap::cli::Cli;
use gitsnap::config::SourceConfigBuilder;
use gitsnap::errors::Error;
use gitsnap::signal::setup_signal_handler;
use gitsnap::source::{
    ATTR_AUTH_HEADER_SECRET, ATTR_AUTH_TOKEN_SECRET, ATTR_CLIENT_IDS, ATTR_KEEP_GIT_DIR,
    ATTR_KNOWN_SSH_HOSTS, ATTR_MOUNT_SSH_SOCK,
};
use gitsnap::{CancellationToken, GitIdentifier, GitSource, LocalCache, StaticSession};
use std::collections::HashMap;
use std::sync::Arc;

fn main() -> Result<()> {
    // Initialize logging. Default to 'info' if RUST_LOG is not set.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                if cfg!(debug_assertions) {
                    "gitsnap=debug".parse()?
                } else {
                    "gitsnap=info".parse()?
                },
            ),
        )
        .init();

    log::debug!("Starting gitsnap v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let token = setup_signal_handler()?;

    if let Err(e) = run(&cli, &token) {
        if e.downcast_ref::<Error>().map_or(false, Error::is_cancelled) {
            eprintln!("\nOperation cancelled.");
            std::process::exit(130);
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli, token: &CancellationToken) -> Result<()> {
    let config = SourceConfigBuilder::from_cli(cli).build()?;
    log::debug!("Using cache at {}", config.cache_dir.display());

    let cache = LocalCache::open(&config.cache_dir)
        .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))?;
    let source = GitSource::new(Arc::new(cache), config);

    let id = identifier_from_cli(&source, cli)?;
    let session = session_from_cli(cli)?;
    let handler = source.resolve(id, Some(Arc::new(session)));

    let info = handler.cache_key(token)?;
    if cli.key_only {
        println!("{} {}", info.key, info.pin);
        return Ok(());
    }

    let snapshot = handler.snapshot(token)?;
    let mount = snapshot.mount()?;
    if cli.output_path {
        println!("{}", mount.path().display());
    } else {
        println!("key: {}", info.key);
        println!("pin: {}", info.pin);
        println!("snapshot: {}", snapshot.id());
        println!("path: {}", mount.path().display());
    }
    Ok(())
}

/// The identifier with CLI flags applied as `git.*` attributes.
fn identifier_from_cli(source: &GitSource, cli: &Cli) -> Result<GitIdentifier> {
    let mut attrs = HashMap::new();
    if cli.keep_git_dir {
        attrs.insert(ATTR_KEEP_GIT_DIR.to_string(), "true".to_string());
    }
    if let Some(name) = &cli.auth_token_secret {
        attrs.insert(ATTR_AUTH_TOKEN_SECRET.to_string(), name.clone());
    }
    if let Some(name) = &cli.auth_header_secret {
        attrs.insert(ATTR_AUTH_HEADER_SECRET.to_string(), name.clone());
    }
    if let Some(path) = &cli.known_hosts {
        let known_hosts = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read known hosts file {}", path.display()))?;
        attrs.insert(ATTR_KNOWN_SSH_HOSTS.to_string(), known_hosts);
    }
    if let Some(id) = &cli.mount_ssh_sock {
        attrs.insert(ATTR_MOUNT_SSH_SOCK.to_string(), id.clone());
    }
    if !cli.client_ids.is_empty() {
        attrs.insert(ATTR_CLIENT_IDS.to_string(), cli.client_ids.join(","));
    }

    let mut id = source.identifier(&cli.identifier, &attrs)?;
    if let Some(git_ref) = &cli.git_ref {
        id = id.with_ref(git_ref.clone());
    }
    if let Some(subdir) = &cli.subdir {
        id = id.with_subdir(subdir.clone());
    }
    log::debug!("Resolving {:?}", id);
    Ok(id)
}

/// An in-memory session holding the secrets and sockets named on the command line.
fn session_from_cli(cli: &Cli) -> Result<StaticSession> {
    let mut session = StaticSession::new();
    for (name, var) in &cli.secrets {
        let value = std::env::var(var)
            .with_context(|| format!("Environment variable {} for secret {} is not set", var, name))?;
        session = session.with_secret(name.clone(), value);
    }
    for (id, path) in &cli.ssh_sockets {
        session = session.with_ssh_socket(id.clone(), path.clone());
    }
    Ok(session)
}
