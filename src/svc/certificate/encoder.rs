//! # Encoder module
//!
//! This module provide the [`Base64Encoder`] capability used to embed the
//! certificate material in a secret

use std::{
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine};
use tokio::process;

use crate::svc::{certificate::Location, cfg::Encoding};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read '{0:?}', {1}")]
    Read(PathBuf, io::Error),
    #[error("failed to execute '{0}', {1}")]
    Spawn(String, io::Error),
    #[error("failed to encode '{0:?}', command exited with {1}")]
    Status(PathBuf, ExitStatus),
    #[error("failed to decode output of the encoding of '{0:?}', {1}")]
    Utf8(PathBuf, std::string::FromUtf8Error),
}

// -----------------------------------------------------------------------------
// Base64Encoder trait

#[async_trait]
pub trait Base64Encoder: Send + Sync {
    /// returns the standard base64 encoding of the file content without line
    /// wrapping
    async fn encode(&self, path: &Path) -> Result<String, Error>;
}

// -----------------------------------------------------------------------------
// Builtin structure

/// Encodes in process
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Builtin;

#[async_trait]
impl Base64Encoder for Builtin {
    async fn encode(&self, path: &Path) -> Result<String, Error> {
        let buf = tokio::fs::read(path)
            .await
            .map_err(|err| Error::Read(path.to_path_buf(), err))?;

        Ok(BASE64_ENGINE.encode(buf))
    }
}

// -----------------------------------------------------------------------------
// Command structure

/// Delegates the encoding to `base64 -w 0`
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Command {
    pub binary: String,
}

impl Default for Command {
    fn default() -> Self {
        Self {
            binary: "base64".into(),
        }
    }
}

#[async_trait]
impl Base64Encoder for Command {
    async fn encode(&self, path: &Path) -> Result<String, Error> {
        let output = process::Command::new(&self.binary)
            .arg("-w")
            .arg("0")
            .arg(path)
            .output()
            .await
            .map_err(|err| Error::Spawn(self.binary.to_owned(), err))?;

        if !output.status.success() {
            return Err(Error::Status(path.to_path_buf(), output.status));
        }

        String::from_utf8(output.stdout)
            .map(|encoded| encoded.trim().to_string())
            .map_err(|err| Error::Utf8(path.to_path_buf(), err))
    }
}

// -----------------------------------------------------------------------------
// Material structure

/// Base64 encoded certificate and private key
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Material {
    pub certificate: String,
    pub private_key: String,
}

// -----------------------------------------------------------------------------
// helpers

pub fn from_encoding(encoding: Encoding) -> Arc<dyn Base64Encoder> {
    match encoding {
        Encoding::Builtin => Arc::new(Builtin),
        Encoding::Command => Arc::new(Command::default()),
    }
}

/// reads and encodes the certificate material found at the given location
pub async fn encode(encoder: &dyn Base64Encoder, location: &Location) -> Result<Material, Error> {
    Ok(Material {
        certificate: encoder.encode(&location.certificate).await?,
        private_key: encoder.encode(&location.private_key).await?,
    })
}
