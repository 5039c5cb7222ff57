use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use crate::commands::{build::BuildArgs, validate::ValidateArgs};

/// Build reusable LXC templates on a Proxmox VE cluster.
#[derive(Parser, Debug)]
#[command(name = "proxlxc", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check a build configuration without touching the cluster
    Validate(ValidateArgs),
    /// Run a build and write the template archive
    Build(BuildArgs),
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Verbose logging for the builder (overridden by RUST_LOG)
    #[arg(long, global = true, env = "PROXLXC_DEBUG")]
    pub debug: bool,
}

/// Configuration sources shared by every subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (JSON, or YAML by .yml/.yaml extension). Later files win.
    #[arg(required = true, num_args = 1..)]
    pub config: Vec<PathBuf>,

    /// Override a single key, e.g. `--var vmid=9000`. Values are parsed as JSON when possible.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

impl ConfigArgs {
    /// Raw configuration maps in merge order: files first, then `--var` overrides.
    pub fn raw_sources(&self) -> anyhow::Result<Vec<Value>> {
        let mut sources = self
            .config
            .iter()
            .map(|path| load_file(path))
            .collect::<anyhow::Result<Vec<_>>>()?;

        if !self.vars.is_empty() {
            let mut overrides = serde_json::Map::new();
            for var in &self.vars {
                let (key, value) = parse_var(var)?;
                overrides.insert(key, value);
            }
            sources.push(Value::Object(overrides));
        }
        Ok(sources)
    }
}

fn load_file(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
    }
}

/// `key=value`; the value is JSON if it parses as such, a string otherwise.
fn parse_var(var: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = var
        .split_once('=')
        .with_context(|| format!("--var {:?} is not KEY=VALUE", var))?;
    if key.is_empty() {
        anyhow::bail!("--var {:?} has an empty key", var);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
