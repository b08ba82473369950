//! # Certificate module
//!
//! This module provide the capabilities used to obtain a certificate from an
//! acme certificate authority and to encode the resulting material

use std::path::{Path, PathBuf};

use crate::svc::cfg::{Runtime, Scope};

pub mod encoder;
pub mod issuer;

// -----------------------------------------------------------------------------
// Constants

pub const CERTIFICATE_FILE: &str = "fullchain.pem";
pub const PRIVATE_KEY_FILE: &str = "privkey.pem";

// -----------------------------------------------------------------------------
// Location structure

/// Paths of the full chain certificate and its private key in the live
/// directory of the acme client
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Location {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl Location {
    pub fn new(live_directory: &Path, lineage: &str) -> Self {
        let directory = live_directory.join(lineage);

        Self {
            certificate: directory.join(CERTIFICATE_FILE),
            private_key: directory.join(PRIVATE_KEY_FILE),
        }
    }
}

impl From<&Runtime> for Location {
    fn from(runtime: &Runtime) -> Self {
        let domains = domains(runtime);

        Self::new(&runtime.certificate.live_directory, &lineage(&domains))
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the domains covered by the certificate, the wildcard apps domain
/// always comes first
pub fn domains(runtime: &Runtime) -> Vec<String> {
    let mut domains = vec![format!("*.apps.{}", runtime.cluster_domain)];

    if runtime.certificate.scope == Scope::Full {
        domains.push(format!("*.{}", runtime.cluster_domain));
        domains.push(format!("*.{}", runtime.base_domain));
        domains.push(runtime.base_domain.to_owned());
    }

    domains
}

/// returns the name of the directory in which the acme client stores the
/// certificate, named after the first domain without its wildcard label
pub fn lineage(domains: &[String]) -> String {
    domains
        .first()
        .map(|domain| domain.trim_start_matches("*.").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::svc::cfg::{Certificate, Cluster, Console, Pacing, Secret};

    use super::*;

    fn runtime(scope: Scope) -> Runtime {
        Runtime {
            email: "ops@example.com".into(),
            base_domain: "example.com".into(),
            cluster_domain: "lab.example.com".into(),
            test: false,
            cluster: Cluster::default(),
            certificate: Certificate {
                scope,
                live_directory: PathBuf::from("/etc/letsencrypt/live"),
                ..Default::default()
            },
            secret: Secret::default(),
            console: Console::default(),
            pacing: Pacing::default(),
        }
    }

    #[test]
    fn full_scope_covers_cluster_and_base_domains() {
        assert_eq!(
            domains(&runtime(Scope::Full)),
            vec![
                "*.apps.lab.example.com",
                "*.lab.example.com",
                "*.example.com",
                "example.com"
            ]
        );
    }

    #[test]
    fn apps_scope_covers_only_applications() {
        assert_eq!(domains(&runtime(Scope::Apps)), vec!["*.apps.lab.example.com"]);
    }

    #[test]
    fn location_follows_lineage() {
        let location = Location::from(&runtime(Scope::Full));

        assert_eq!(
            location.certificate,
            PathBuf::from("/etc/letsencrypt/live/apps.lab.example.com/fullchain.pem")
        );
        assert_eq!(
            location.private_key,
            PathBuf::from("/etc/letsencrypt/live/apps.lab.example.com/privkey.pem")
        );
    }
}
