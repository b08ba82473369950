//! # Issuer module
//!
//! This module provide the [`CertificateIssuer`] capability and its
//! implementation on top of the certbot command line interface

use std::{
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::svc::{
    certificate::domains,
    cfg::{self, Runtime},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute '{0}', {1}")]
    Spawn(String, io::Error),
    #[error("acme client exited with {0}")]
    Status(ExitStatus),
}

// -----------------------------------------------------------------------------
// Request structure

/// Everything the acme client needs to obtain or renew the certificate
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Request {
    pub email: String,
    pub domains: Vec<String>,
    pub credentials: PathBuf,
    /// targets the staging certificate authority
    pub staging: bool,
}

impl From<&Runtime> for Request {
    fn from(runtime: &Runtime) -> Self {
        Self {
            email: runtime.email.to_owned(),
            domains: domains(runtime),
            credentials: runtime.certificate.credentials.to_owned(),
            staging: runtime.test,
        }
    }
}

// -----------------------------------------------------------------------------
// CertificateIssuer trait

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// obtain or renew the certificate into the local certificate store
    async fn issue(&self, request: &Request) -> Result<(), Error>;
}

// -----------------------------------------------------------------------------
// Certbot structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Certbot {
    pub binary: String,
    /// name of the dns-01 plugin, `digitalocean` selects `--dns-digitalocean`
    pub plugin: String,
}

impl From<&cfg::Certificate> for Certbot {
    fn from(certificate: &cfg::Certificate) -> Self {
        Self {
            binary: certificate.binary.to_owned(),
            plugin: certificate.plugin.to_owned(),
        }
    }
}

impl Certbot {
    pub fn arguments(&self, request: &Request) -> Vec<String> {
        let mut args = vec![
            "certonly".to_string(),
            "--non-interactive".into(),
            "--agree-tos".into(),
            format!("--dns-{}", self.plugin),
            format!("--dns-{}-credentials", self.plugin),
            request.credentials.to_string_lossy().to_string(),
            "--email".into(),
            request.email.to_owned(),
        ];

        for domain in &request.domains {
            args.push("-d".into());
            args.push(domain.to_owned());
        }

        if request.staging {
            args.push("--test-cert".into());
        }

        args
    }
}

#[async_trait]
impl CertificateIssuer for Certbot {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn issue(&self, request: &Request) -> Result<(), Error> {
        let args = self.arguments(request);

        debug!(binary = &self.binary, args = args.join(" "), "Execute acme client");
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| Error::Spawn(self.binary.to_owned(), err))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("{}", stderr);
        }

        if !output.status.success() {
            return Err(Error::Status(output.status));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::cfg::{Certificate, Cluster, Console, Pacing, Scope, Secret};

    fn request(staging: bool) -> Request {
        Request {
            email: "ops@example.com".into(),
            domains: vec!["*.apps.lab.example.com".into(), "example.com".into()],
            credentials: PathBuf::from("/etc/letsencrypt/digitalocean.ini"),
            staging,
        }
    }

    fn certbot(binary: &str) -> Certbot {
        Certbot {
            binary: binary.into(),
            plugin: "digitalocean".into(),
        }
    }

    #[test]
    fn arguments_select_dns_plugin_and_domains() {
        assert_eq!(
            certbot("certbot-3").arguments(&request(false)),
            vec![
                "certonly",
                "--non-interactive",
                "--agree-tos",
                "--dns-digitalocean",
                "--dns-digitalocean-credentials",
                "/etc/letsencrypt/digitalocean.ini",
                "--email",
                "ops@example.com",
                "-d",
                "*.apps.lab.example.com",
                "-d",
                "example.com",
            ]
        );
    }

    #[test]
    fn arguments_target_staging_in_test_mode() {
        let args = certbot("certbot-3").arguments(&request(true));

        assert_eq!(args.last().map(String::as_str), Some("--test-cert"));
        assert_eq!(args.iter().filter(|arg| *arg == "--test-cert").count(), 1);
    }

    #[test]
    fn request_from_runtime_carries_test_mode() {
        let runtime = Runtime {
            email: "ops@example.com".into(),
            base_domain: "example.com".into(),
            cluster_domain: "lab.example.com".into(),
            test: true,
            cluster: Cluster::default(),
            certificate: Certificate {
                scope: Scope::Apps,
                credentials: PathBuf::from("/run/secrets/do.ini"),
                ..Default::default()
            },
            secret: Secret::default(),
            console: Console::default(),
            pacing: Pacing::default(),
        };

        let request = Request::from(&runtime);
        assert!(request.staging);
        assert_eq!(request.email, "ops@example.com");
        assert_eq!(request.domains, vec!["*.apps.lab.example.com"]);
        assert_eq!(request.credentials, PathBuf::from("/run/secrets/do.ini"));
        assert_eq!(
            certbot("certbot-3").arguments(&request).last().map(String::as_str),
            Some("--test-cert")
        );

        assert!(!Request::from(&Runtime { test: false, ..runtime }).staging);
    }

    #[tokio::test]
    async fn issue_succeeds_on_zero_exit() {
        assert!(certbot("true").issue(&request(false)).await.is_ok());
    }

    #[tokio::test]
    async fn issue_fails_on_non_zero_exit() {
        let result = certbot("false").issue(&request(false)).await;

        assert!(matches!(result, Err(Error::Status(status)) if !status.success()));
    }

    #[tokio::test]
    async fn issue_fails_when_binary_is_missing() {
        let result = certbot("certbot-does-not-exist").issue(&request(false)).await;

        assert!(matches!(result, Err(Error::Spawn(binary, _)) if binary == "certbot-does-not-exist"));
    }
}
