//! # Context module
//!
//! This module provide the values derived once per run and threaded through
//! the steps of the rotation

use std::{io, path::PathBuf};

use tracing::info;

use crate::svc::{
    cfg::{Mode, Runtime},
    k8s::{client, openshift, secret},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read service account token '{0:?}', {1}")]
    Token(PathBuf, io::Error),
    #[error("{0}")]
    Client(client::Error),
    #[error("failed to retrieve the certificate of the default ingress controller, {0}")]
    Lookup(kube::Error),
}

impl From<client::Error> for Error {
    fn from(err: client::Error) -> Self {
        Self::Client(err)
    }
}

// -----------------------------------------------------------------------------
// Context structure

#[derive(Clone)]
pub struct Context {
    pub client: kube::Client,
    /// name of the secret published by this run
    pub secret_name: String,
    /// name of the secret served before this run, known up front in rotate
    /// mode only
    pub previous: Option<String>,
}

impl Context {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(runtime)))]
    pub async fn build(runtime: &Runtime) -> Result<Self, Error> {
        let token = tokio::fs::read_to_string(&runtime.cluster.token)
            .await
            .map_err(|err| Error::Token(runtime.cluster.token.to_owned(), err))?;

        let authority = client::anchors(
            client::authority(&runtime.cluster.authority).await?,
            client::native_roots(),
        );
        let client = client::try_new(
            &runtime.endpoint(),
            token.trim(),
            authority,
            runtime.cluster.accept_invalid_certs,
        )?;

        let (secret_name, previous) = match runtime.secret.mode {
            Mode::Rotate => {
                let previous = openshift::default_certificate(client.to_owned())
                    .await
                    .map_err(Error::Lookup)?;

                (
                    secret::generate_name(&runtime.secret.name, previous.as_deref()),
                    previous,
                )
            }
            Mode::Fixed => (runtime.secret.name.to_owned(), None),
        };

        info!(
            cluster_domain = &runtime.cluster_domain,
            endpoint = runtime.endpoint(),
            secret = &secret_name,
            previous = previous.as_deref().unwrap_or("<none>"),
            "Built rotation context"
        );

        Ok(Self {
            client,
            secret_name,
            previous,
        })
    }
}
