//! # Secret module
//!
//! This module provides the secret command line interface function
//! implementation

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;

use crate::{
    cmd::Executor,
    svc::{
        certificate::{encoder, Location},
        cfg::{self, Configuration},
        k8s::secret::TlsSecret,
    },
};

// -----------------------------------------------------------------------------
// SecretError enum

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("failed to validate configuration, {0}")]
    Configuration(cfg::Error),
    #[error("failed to encode certificate material, {0}")]
    Encode(encoder::Error),
    #[error("failed to serialize secret, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// Secret enum

#[derive(Subcommand, Clone, Debug)]
pub enum Secret {
    #[clap(name = "generate", aliases = &["g"], about = "Generate the tls secret from the local certificate store")]
    Generate {
        #[clap(short = 'n', long = "name", help = "Name of the secret")]
        name: Option<String>,
        #[clap(short = 'N', long = "namespace", help = "Namespace of the secret")]
        namespace: Option<String>,
    },
}

#[async_trait]
impl Executor for Secret {
    type Error = SecretError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::Generate { namespace, name } => {
                println!("{}", generate(config, namespace.to_owned(), name.to_owned()).await?);
                Ok(())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// generate function

/// returns the yaml manifest of the tls secret built from the certificate
/// store, the configured secret name is used when none is given
#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn generate(
    config: Arc<Configuration>,
    namespace: Option<String>,
    name: Option<String>,
) -> Result<String, SecretError> {
    let runtime = config.validate().map_err(SecretError::Configuration)?;
    let encoder = encoder::from_encoding(runtime.certificate.encoding);
    let material = encoder::encode(&*encoder, &Location::from(&runtime))
        .await
        .map_err(SecretError::Encode)?;

    let name = name.unwrap_or_else(|| runtime.secret.name.to_owned());
    let secret = TlsSecret::new(&name, namespace, &material);

    serde_yaml::to_string(&secret).map_err(SecretError::Serialize)
}
