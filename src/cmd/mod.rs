//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::warn;

use crate::svc::{
    cfg::{self, Configuration},
    pipeline::{self, Pipeline},
};

pub mod secret;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    Secret(secret::SecretError),
    #[error("failed to validate configuration, {0}")]
    Configuration(cfg::Error),
    #[error("failed to rotate certificate, {0}")]
    Pipeline(pipeline::Error),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with the tls secret
    #[clap(name = "secret", subcommand)]
    Secret(secret::Secret),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::Secret(secret) => secret
                .execute(config)
                .await
                .map_err(Error::Secret)
                .map_err(|err| Error::Execution("secret".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// rotate function

/// validates the configuration, then runs the rotation pipeline once
#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn rotate(config: Arc<Configuration>) -> Result<(), Error> {
    let runtime = config.validate().map_err(Error::Configuration)?;
    let report = Pipeline::from(runtime)
        .run()
        .await
        .map_err(Error::Pipeline)?;

    for record in report.failures() {
        warn!(
            step = record.step.to_string(),
            target = record.target.as_deref().unwrap_or("<cluster>"),
            "Step did not complete during the rotation"
        );
    }

    Ok(())
}
