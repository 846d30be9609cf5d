//! Command-line arguments and connection planning

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use cm_core::config::{self, AgentConfig};
use cm_protocol::ExecutionData;

/// File created beside the config when a run has no input of its own
pub const EMPTY_INPUT_NAME: &str = "empty";

#[derive(Parser, Debug)]
#[command(name = "cm-agent")]
#[command(about = "Chameleon agent - runs models for a Chameleon controller")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the main connection for an execution history
    Attach {
        /// Controller host
        host: String,
        /// Controller port
        port: u16,
        /// Execution history to report for
        history_id: u64,
    },

    /// Run a model through the configured controller
    ///
    /// PATHS is empty, `PARAMETERS OUTPUT`, or `INPUT PARAMETERS OUTPUT`.
    Run {
        /// Model as `username/uniqueName`
        model: String,
        /// Input, parameters and output files
        paths: Vec<PathBuf>,
    },
}

/// Everything needed to open one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub config: AgentConfig,
    pub history_id: u64,
    pub execution: Option<ExecutionData>,
}

impl Plan {
    /// Resolve arguments and the config file into a connection plan
    pub fn from_args(args: &Args) -> Result<Self> {
        let config_path = args
            .config
            .clone()
            .unwrap_or_else(config::default_config_path);

        match &args.command {
            Command::Attach {
                host,
                port,
                history_id,
            } => {
                let mut config = if config_path.exists() {
                    config::load_config(&config_path).unwrap_or_else(|e| {
                        tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
                        AgentConfig::default()
                    })
                } else {
                    AgentConfig::default()
                };
                config.controller_address = format!("{}:{}", host, port);
                config.history_id = Some(*history_id);

                // Later `run` invocations find the controller through this file
                if !config_path.exists() {
                    config::save_config(&config_path, &config).with_context(|| {
                        format!("Failed to write config to {:?}", config_path)
                    })?;
                    tracing::info!("Saved controller settings to {:?}", config_path);
                }

                Ok(Self {
                    config,
                    history_id: *history_id,
                    execution: None,
                })
            }

            Command::Run { model, paths } => {
                let config: AgentConfig = config::load_config(&config_path).with_context(|| {
                    format!(
                        "No usable agent configuration at {:?}; attach to a controller first",
                        config_path
                    )
                })?;
                let history_id = config.require_history_id()?;
                let empty_dir = config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let execution = execution_for(model, paths, &empty_dir)?;

                Ok(Self {
                    config,
                    history_id,
                    execution: Some(execution),
                })
            }
        }
    }
}

/// Split `username/uniqueName`
pub fn parse_model(model: &str) -> Result<(String, String)> {
    match model.split_once('/') {
        Some((username, unique_name))
            if !username.is_empty() && !unique_name.is_empty() && !unique_name.contains('/') =>
        {
            Ok((username.to_string(), unique_name.to_string()))
        }
        _ => bail!("Model must be given as USERNAME/UNIQUE_NAME, got '{}'", model),
    }
}

/// Build the execution announced in the greeting.
///
/// With only parameters and output, an empty input file is created in
/// `empty_dir`.
pub fn execution_for(model: &str, paths: &[PathBuf], empty_dir: &Path) -> Result<ExecutionData> {
    let (username, unique_name) = parse_model(model)?;
    let mut execution = ExecutionData {
        username,
        unique_name,
        input_path: None,
        parameters_path: None,
        output_path: None,
    };

    match paths {
        [] => {}
        [parameters, output] => {
            require_exists(&[parameters, output])?;
            let empty = empty_dir.join(EMPTY_INPUT_NAME);
            std::fs::create_dir_all(empty_dir)
                .with_context(|| format!("Failed to create {:?}", empty_dir))?;
            std::fs::File::create(&empty)
                .with_context(|| format!("Failed to create empty input {:?}", empty))?;
            execution.input_path = Some(display(&empty));
            execution.parameters_path = Some(display(parameters));
            execution.output_path = Some(display(output));
        }
        [input, parameters, output] => {
            require_exists(&[input, parameters])?;
            execution.input_path = Some(display(input));
            execution.parameters_path = Some(display(parameters));
            execution.output_path = Some(display(output));
        }
        _ => bail!(
            "Expected no paths, PARAMETERS OUTPUT, or INPUT PARAMETERS OUTPUT; got {} paths",
            paths.len()
        ),
    }

    Ok(execution)
}

fn require_exists(paths: &[&PathBuf]) -> Result<()> {
    for path in paths {
        if !path.exists() {
            bail!("The file does not exist at path: {}", path.display());
        }
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
