// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pieces shared by the `bb-instrument` and `kernel-extract` binaries.

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use clap::Args;
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Config, ConfigError, ExtractError, InstrumentError};

/// `--config` plus the text grammar overrides.
#[derive(Debug, Clone, Default, Args)]
pub struct GrammarArgs {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Regex matching kernel-boundary lines; must capture `name`
    #[arg(long, value_name = "REGEX")]
    pub kernel_marker: Option<String>,

    /// Regex matching labels that open a basic block
    #[arg(long, value_name = "REGEX")]
    pub block_label: Option<String>,

    /// Regex matching the end-of-program mnemonic
    #[arg(long, value_name = "REGEX")]
    pub terminator: Option<String>,
}

impl GrammarArgs {
    /// Load the configuration file, if any, and apply the grammar overrides.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(pattern) = &self.kernel_marker {
            config.grammar.kernel_marker = pattern.clone();
        }
        if let Some(pattern) = &self.block_label {
            config.grammar.block_label = pattern.clone();
        }
        if let Some(pattern) = &self.terminator {
            config.grammar.terminator = pattern.clone();
        }
    }
}

/// Every configuration override `bb-instrument` accepts.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub grammar: GrammarArgs,

    /// VGPR holding the counter value during the update
    #[arg(long, value_name = "REG")]
    pub scratch_register: Option<String>,

    /// VGPR holding the wavefront's counter base address
    #[arg(long, value_name = "REG")]
    pub address_register: Option<String>,

    /// Registers the kernel is known not to use (repeatable, replaces the default set)
    #[arg(long = "safe-register", value_name = "REG")]
    pub safe_registers: Vec<String>,

    /// Bytes per counter (4 or 8)
    #[arg(long, value_name = "BYTES")]
    pub slot_size: Option<u32>,

    /// Wavefronts sharing one workgroup's counter region
    #[arg(long, value_name = "N")]
    pub wavefronts_per_workgroup: Option<u32>,

    /// LDS budget for the counter region, in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_region_bytes: Option<u64>,

    /// Omit the wait between counter load and increment
    #[arg(long)]
    pub no_wait: bool,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = self.grammar.load()?;

        if let Some(register) = &self.scratch_register {
            config.registers.scratch = register.clone();
        }
        if let Some(register) = &self.address_register {
            config.registers.address = register.clone();
        }
        if !self.safe_registers.is_empty() {
            config.registers.safe = self.safe_registers.clone();
        }
        if let Some(slot_size) = self.slot_size {
            config.layout.slot_size = slot_size;
        }
        if let Some(wavefronts) = self.wavefronts_per_workgroup {
            config.layout.wavefronts_per_workgroup = wavefronts;
        }
        if let Some(budget) = self.max_region_bytes {
            config.layout.max_region_bytes = budget;
        }
        if self.no_wait {
            config.codegen.wait.clear();
        }

        Ok(config)
    }
}

/// Failure of a CLI run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error(transparent)]
    Pipeline(#[from] crate::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Pipeline(err) => err.exit_code(),
            _ => 1,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Pipeline(err.into())
    }
}

impl From<ExtractError> for CliError {
    fn from(err: ExtractError) -> Self {
        CliError::Pipeline(err.into())
    }
}

impl From<InstrumentError> for CliError {
    fn from(err: InstrumentError) -> Self {
        CliError::Pipeline(err.into())
    }
}

/// Install a stderr subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

/// Read a file, or stdin when `path` is absent or `-`.
pub fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) if path != Path::new("-") => {
            fs::read_to_string(path).map_err(|source| CliError::Read {
                path: path.display().to_string(),
                source,
            })
        }
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|source| CliError::Read {
                    path: "<stdin>".to_string(),
                    source,
                })?;
            Ok(input)
        }
    }
}

pub fn write_file(path: &Path, contents: &str) -> Result<(), CliError> {
    fs::write(path, contents).map_err(|source| CliError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_stdout(contents: &str) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(contents.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|source| CliError::Write {
            path: "<stdout>".to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::ConfigArgs;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--scratch-register",
            "v200",
            "--safe-register",
            "v[200:201]",
            "--address-register",
            "v201",
            "--slot-size",
            "8",
            "--no-wait",
            "--block-label",
            "^L\\d+$",
        ]);
        let config = cli.config.load().unwrap();

        assert_eq!(config.registers.scratch, "v200");
        assert_eq!(config.registers.safe, vec!["v[200:201]"]);
        assert_eq!(config.layout.slot_size, 8);
        assert!(config.codegen.wait.is_empty());
        assert_eq!(config.grammar.block_label, "^L\\d+$");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_flags_is_default() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.config.load().unwrap(), crate::Config::default());
    }
}
