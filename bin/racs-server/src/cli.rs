//! CLI flags and layered config loading (file < env < CLI, §6).

use std::path::PathBuf;

use clap::Parser;
use racs_common::Config;

#[derive(Debug, Parser)]
#[command(name = "racs-server", about = "Redundant array of cloud storage proxy")]
pub struct Args {
    /// Path to the TOML config file.
    #[arg(long, env = "RACS_CONFIG", default_value = "racs.toml")]
    pub config: PathBuf,

    /// Overrides `[racs].host`.
    #[arg(long, env = "RACS_HOST")]
    pub host: Option<String>,

    /// Overrides `[racs].port`.
    #[arg(long, env = "RACS_PORT")]
    pub port: Option<u16>,

    /// Overrides `[racs].k`.
    #[arg(long = "ec-k", env = "RACS_K")]
    pub k: Option<u8>,

    /// Overrides `[racs].m`.
    #[arg(long = "ec-m", env = "RACS_M")]
    pub m: Option<u8>,

    #[arg(long, env = "RACS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Loads config from `path`, then overlays `RACS_*` environment
/// variables, then the explicit CLI flags that were actually passed.
/// Exits the process with a nonzero code on any failure, matching the
/// reference implementation's startup behavior (§6).
pub fn load_config(args: &Args) -> anyhow::Result<Config> {
    let builder = config::Config::builder()
        .add_source(config::File::from(args.config.as_path()).required(true))
        .add_source(config::Environment::with_prefix("RACS").separator("__"));

    let mut cfg: Config = builder.build()?.try_deserialize()?;

    if let Some(host) = &args.host {
        cfg.racs.host = host.clone();
    }
    if let Some(port) = args.port {
        cfg.racs.port = port;
    }
    if let Some(k) = args.k {
        cfg.racs.k = k;
    }
    if let Some(m) = args.m {
        cfg.racs.m = Some(m);
    }

    cfg.validate().map_err(anyhow::Error::msg)?;
    Ok(cfg)
}
