//! # Client module
//!
//! This module provide an helper to create a kubernetes client authenticated
//! with a service account token

use std::{io, path::Path};

use hyper::{http::uri::InvalidUri, Uri};
use kube::{config::AuthInfo, Config};
use secrecy::SecretString;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse cluster endpoint '{0}', {1}")]
    Endpoint(String, InvalidUri),
    #[error("failed to read certificate authority '{0}', {1}")]
    ReadAuthority(String, io::Error),
    #[error("failed to parse certificate authority '{0}', {1}")]
    ParseAuthority(String, pem::PemError),
    #[error("failed to create kubernetes client, {0}")]
    CreateClient(kube::Error),
}

/// returns the der encoded certificates of the pem bundle at the given path,
/// or none if there is no such file
pub async fn authority(path: &Path) -> Result<Option<Vec<Vec<u8>>>, Error> {
    let buf = match tokio::fs::read(path).await {
        Ok(buf) => buf,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(Error::ReadAuthority(path.display().to_string(), err));
        }
    };

    let certificates = pem::parse_many(buf)
        .map_err(|err| Error::ParseAuthority(path.display().to_string(), err))?;

    Ok(Some(
        certificates
            .into_iter()
            .map(pem::Pem::into_contents)
            .collect(),
    ))
}

/// returns the trust anchors of the client: the cluster bundle followed by
/// the public roots. Without cluster bundle, kube falls back on the host
/// roots on its own.
pub fn anchors(bundle: Option<Vec<Vec<u8>>>, public: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
    let mut anchors = bundle?;

    for certificate in public {
        if !anchors.contains(&certificate) {
            anchors.push(certificate);
        }
    }

    Some(anchors)
}

/// returns the der encoded root certificates of the host which rustls is
/// able to load, an unreadable store yields no certificate
pub fn native_roots() -> Vec<Vec<u8>> {
    let certificates = match rustls_native_certs::load_native_certs() {
        Ok(certificates) => certificates,
        Err(err) => {
            warn!(error = err.to_string(), "failed to load root certificates of the host");
            return vec![];
        }
    };

    let total = certificates.len();
    let roots: Vec<_> = certificates
        .into_iter()
        .map(|certificate| certificate.0)
        .filter(|der| parsable(der))
        .collect();

    debug!(total = total, loaded = roots.len(), "loaded root certificates of the host");
    roots
}

// kube refuses to build a client as soon as one root is rejected by rustls
fn parsable(der: &[u8]) -> bool {
    rustls::RootCertStore::empty()
        .add(&rustls::Certificate(der.to_vec()))
        .is_ok()
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(token, authority)))]
/// returns a new kubernetes client talking to the given endpoint using the
/// bearer token. Without authority, the system trust store is used.
pub fn try_new(
    endpoint: &str,
    token: &str,
    authority: Option<Vec<Vec<u8>>>,
    accept_invalid_certs: bool,
) -> Result<kube::Client, Error> {
    let uri = endpoint
        .parse::<Uri>()
        .map_err(|err| Error::Endpoint(endpoint.to_string(), err))?;

    let mut config = Config::new(uri);
    config.root_cert = authority;
    config.accept_invalid_certs = accept_invalid_certs;
    config.auth_info = AuthInfo {
        token: Some(SecretString::new(token.to_string())),
        ..Default::default()
    };

    kube::Client::try_from(config).map_err(Error::CreateClient)
}
