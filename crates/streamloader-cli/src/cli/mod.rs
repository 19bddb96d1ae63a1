//! CLI for the streamloader range-request loader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use streamloader_core::config::{self, IdentityConfig, LoaderConfig};

use commands::{run_completions, run_fetch, run_info, run_scheme};

/// Top-level CLI for streamloader.
#[derive(Debug, Parser)]
#[command(name = "streamloader")]
#[command(about = "streamloader: range-request streaming loader for media resources", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/streamloader/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// PKCS#12 client identity offered on client-certificate challenges.
    #[arg(long, global = true, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Passphrase for --identity.
    #[arg(long, global = true, default_value = "")]
    pub passphrase: String,

    /// Extra request header, "Name: value". Repeatable.
    #[arg(long = "header", short = 'H', global = true, value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Stream a byte range of a resource to a file or stdout.
    Fetch {
        /// Resource URL, plain http(s) or scheme-marked.
        url: String,
        /// First byte to request.
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Number of bytes; omit to read to the end of the resource.
        #[arg(long)]
        length: Option<u64>,
        /// Write to this file instead of stdout.
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Probe a resource and print its content information.
    Info {
        /// Resource URL, plain http(s) or scheme-marked.
        url: String,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Toggle the scheme marker on a URL and print the result.
    Scheme {
        url: String,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {:?}", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_from(path)?,
            None => config::load_or_init()?,
        };
        if let Some(path) = &self.identity {
            cfg.identity = Some(IdentityConfig {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
                label: None,
            });
        }
        for (name, value) in &self.headers {
            cfg.headers.insert(name.clone(), value.clone());
        }
        Ok(cfg)
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = &cli.command {
            run_completions(*shell);
            return Ok(());
        }
        let cfg = cli.loader_config()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                url,
                offset,
                length,
                output,
            } => run_fetch(&cfg, &url, offset, length, output.as_deref()).await?,
            CliCommand::Info { url, json } => run_info(&cfg, &url, json).await?,
            CliCommand::Scheme { url } => run_scheme(&cfg, &url),
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
