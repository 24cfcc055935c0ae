use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(name = "jcomp", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Address to bind, overrides the configuration file
    #[arg(long = "bind-address")]
    pub bind_address: Option<String>,

    /// Port to bind, overrides the configuration file
    #[arg(long = "port", short = 'p')]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file, falling back to defaults
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("unable to open config file {path}"))?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)
                    .with_context(|| format!("invalid config file {path}"))?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sandbox.compiler.is_empty() {
            bail!("sandbox.compiler must name a program");
        }
        if self.sandbox.runtime.is_empty() {
            bail!("sandbox.runtime must name a program");
        }
        if self.sandbox.max_concurrent_jobs == 0 {
            bail!("sandbox.max_concurrent_jobs must not be 0");
        }
        if self.sandbox.max_concurrent_jobs > Semaphore::MAX_PERMITS {
            bail!(
                "sandbox.max_concurrent_jobs must not exceed {}",
                Semaphore::MAX_PERMITS
            );
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 5000,
        }
    }
}

/// Settings for the compile-and-run pipeline
///
/// `compiler` and `runtime` are argument templates: `%SOURCE%` expands to the
/// source file name and `%CLASS%` to the resolved class name.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub scratch_root: PathBuf,
    pub source_extension: String,
    pub default_class_name: String,
    pub compiler: Vec<String>,
    pub runtime: Vec<String>,
    pub compile_time_limit: MilliSecond,
    pub run_time_limit: MilliSecond,
    pub output_limit: ByteSize,
    pub max_concurrent_jobs: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            source_extension: "java".to_string(),
            default_class_name: "Main".to_string(),
            compiler: vec!["javac".to_string(), "%SOURCE%".to_string()],
            runtime: vec![
                "java".to_string(),
                "-cp".to_string(),
                ".".to_string(),
                "%CLASS%".to_string(),
            ],
            compile_time_limit: MilliSecond(10_000),
            run_time_limit: MilliSecond(10_000),
            output_limit: ByteSize(1024 * 1024),
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl MilliSecond {
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);
