use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 6666;
const DEFAULT_DIR: &str = "data";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;
const MIN_PORT: u16 = 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub lock_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Flat-file S3-like object store")]
pub struct Args {
    /// Host to bind to (overrides FLATSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to, 1024-65535 (overrides FLATSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage root holding catalogs and bucket directories (overrides FLATSTORE_DIR)
    #[arg(long = "dir")]
    pub storage_dir: Option<PathBuf>,

    /// How long to wait for a catalog lock, in milliseconds (overrides FLATSTORE_LOCK_TIMEOUT_MS)
    #[arg(long)]
    pub lock_timeout_ms: Option<u64>,
}

impl AppConfig {
    /// Parse CLI args over the process environment.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", name)),
        })
    }

    /// Merge `args` over whatever `lookup` finds, then over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let host = match args.host {
            Some(host) => host,
            None => lookup("FLATSTORE_HOST")?.unwrap_or_else(|| DEFAULT_HOST.into()),
        };
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "FLATSTORE_PORT")?.unwrap_or(DEFAULT_PORT),
        };
        let storage_dir = match args.storage_dir {
            Some(dir) => dir,
            None => lookup("FLATSTORE_DIR")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR)),
        };
        let lock_timeout_ms = match args.lock_timeout_ms {
            Some(ms) => ms,
            None => {
                parse_var(&lookup, "FLATSTORE_LOCK_TIMEOUT_MS")?.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS)
            }
        };

        if port < MIN_PORT {
            bail!("port {} is outside the allowed range {}-65535", port, MIN_PORT);
        }
        if lock_timeout_ms == 0 {
            bail!("lock timeout must be at least 1ms");
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Result<Option<String>>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)?
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}
