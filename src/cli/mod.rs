//! Command-line interface for sitewire.
//!
//! Provides commands for applying the topology, inspecting deployment
//! status, reading published outputs, and printing the evaluation
//! plan.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::DeployConfig;
use crate::core::{evaluation_waves, load_outputs, load_status, Provisioner, StateStore};
use crate::providers::{AwsCliProvider, CloudProvider, MemoryProvider};

/// sitewire - provisioning orchestrator for a static-site + API topology
#[derive(Parser, Debug)]
#[command(name = "sitewire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the full topology and publish the OutputSet
    Provision {
        /// Config file (sitewire.yaml is discovered if not given)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Use the in-memory provider instead of the aws CLI
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a deployment's state machine position and step record
    Status {
        /// Root domain of the deployment
        domain: String,
    },

    /// Print the published OutputSet
    Outputs {
        /// Root domain of the deployment
        domain: String,
    },

    /// Print the step evaluation plan
    Plan,

    /// Show resolved configuration (debug)
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Provision { config, dry_run } => {
                let config = DeployConfig::load(config.as_deref())?;

                let outputs = if dry_run {
                    let provider = MemoryProvider::new(&config.region);
                    provision(provider, config).await?
                } else {
                    let provider = AwsCliProvider::new(&config.region);
                    provision(provider, config).await?
                };

                println!("{}", outputs);
                Ok(())
            }

            Commands::Status { domain } => {
                let base_dir = state_base_dir()?;
                match load_status(&base_dir, &domain).await? {
                    Some(deployment) => {
                        println!("deployment: {}", deployment.domain);
                        println!("state:      {}", deployment.state);
                        println!("run:        {}", deployment.run_id);

                        let mut steps: Vec<_> = deployment.step_statuses.iter().collect();
                        steps.sort_by_key(|(name, _)| name.clone());
                        for (name, status) in steps {
                            println!("  {:<10} {:?}", name, status);
                        }
                    }
                    None => println!("No provisioning record for '{}'", domain),
                }
                Ok(())
            }

            Commands::Outputs { domain } => {
                let base_dir = state_base_dir()?;
                match load_outputs(&base_dir, &domain).await? {
                    Some(outputs) => println!("{}", outputs),
                    None => println!("No published outputs for '{}'", domain),
                }
                Ok(())
            }

            Commands::Plan => {
                let waves = evaluation_waves()?;
                for (i, wave) in waves.iter().enumerate() {
                    let names: Vec<&str> = wave.iter().map(|s| s.as_str()).collect();
                    println!("wave {}: {}", i + 1, names.join(", "));
                }
                Ok(())
            }

            Commands::Config { config } => {
                let config = DeployConfig::load(config.as_deref())?;
                println!("domain:         {}", config.domain);
                println!("api domain:     {}", config.api_domain());
                println!("repo:           {}/{}", config.repo_owner, config.repo_name);
                println!("branch:         {}", config.branch);
                println!("region:         {}", config.region);
                println!("credential ref: {}", config.credential_ref);
                println!("cert timeout:   {}s", config.cert_timeout_seconds);
                println!("state dir:      {}", config.state_base_dir()?.display());
                Ok(())
            }
        }
    }
}

async fn provision<P: CloudProvider>(
    provider: P,
    config: DeployConfig,
) -> Result<crate::domain::OutputSet> {
    let provisioner = Provisioner::new(provider, config).await?;
    provisioner.apply().await
}

fn state_base_dir() -> Result<PathBuf> {
    match std::env::var("SITEWIRE_STATE_DIR") {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => StateStore::default_base_dir(),
    }
}
