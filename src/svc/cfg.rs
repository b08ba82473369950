//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration
//! and to validate it before the rotation begins

use std::{convert::TryFrom, fs::File, io, path::PathBuf};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, Map};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const DEFAULT_AUTHORITY_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
pub const DEFAULT_CREDENTIALS_PATH: &str = "/etc/letsencrypt/digitalocean.ini";
pub const DEFAULT_LIVE_DIRECTORY: &str = "/etc/letsencrypt/live";
pub const DEFAULT_CERTBOT_BINARY: &str = "certbot-3";
pub const DEFAULT_DNS_PLUGIN: &str = "digitalocean";
pub const DEFAULT_SECRET_NAME: &str = "letsencrypt-certs";
pub const DEFAULT_DELAY: u64 = 2_000;
pub const SEPARATOR: &str = "__";

/// plain environment variables mapped to their configuration key, nested
/// keys are read from variables such as `CERTIFICATE__CREDENTIALS`
pub const ENVIRONMENT_VARIABLES: [(&str, &str); 5] = [
    ("EMAIL", "email"),
    ("BASE_DOMAIN", "base_domain"),
    ("CLUSTER_NAME", "cluster_name"),
    ("CLUSTER_DOMAIN", "cluster_domain"),
    ("TEST", "test"),
];

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to set value for key '{0}', {1}")]
    Override(String, ConfigError),
    #[error("missing environment variable '{0}'")]
    Missing(&'static str),
    #[error("failed to read dns provider credentials '{0:?}', {1}")]
    Credentials(PathBuf, io::Error),
}

// -----------------------------------------------------------------------------
// Mode enumeration

/// Policy used to name and publish the certificate secret
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// a new secret with a generated name is created on each run and the
    /// previous one is deleted, the previous reference is mandatory
    #[default]
    Rotate,
    /// the secret keeps the configured name and is created or updated in place
    Fixed,
}

// -----------------------------------------------------------------------------
// Scope enumeration

/// Set of domains requested to the certificate authority
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Full,
    Apps,
}

// -----------------------------------------------------------------------------
// Encoding enumeration

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Builtin,
    Command,
}

// -----------------------------------------------------------------------------
// Cluster structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct Cluster {
    /// overrides the `https://api.<cluster-domain>:6443` endpoint
    #[serde(rename = "endpoint")]
    pub endpoint: Option<String>,
    #[serde(rename = "token")]
    pub token: PathBuf,
    /// pem bundle trusted to serve the api, the system trust store is used
    /// when the file does not exist
    #[serde(rename = "authority")]
    pub authority: PathBuf,
    #[serde(rename = "namespaces")]
    pub namespaces: Vec<String>,
    #[serde(rename = "accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: PathBuf::from(DEFAULT_TOKEN_PATH),
            authority: PathBuf::from(DEFAULT_AUTHORITY_PATH),
            namespaces: vec!["openshift-ingress".into(), "openshift-config".into()],
            accept_invalid_certs: false,
        }
    }
}

// -----------------------------------------------------------------------------
// Certificate structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct Certificate {
    #[serde(rename = "binary")]
    pub binary: String,
    #[serde(rename = "plugin")]
    pub plugin: String,
    #[serde(rename = "credentials")]
    pub credentials: PathBuf,
    #[serde(rename = "live_directory")]
    pub live_directory: PathBuf,
    #[serde(rename = "scope")]
    pub scope: Scope,
    #[serde(rename = "encoding")]
    pub encoding: Encoding,
}

impl Default for Certificate {
    fn default() -> Self {
        Self {
            binary: DEFAULT_CERTBOT_BINARY.into(),
            plugin: DEFAULT_DNS_PLUGIN.into(),
            credentials: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            live_directory: PathBuf::from(DEFAULT_LIVE_DIRECTORY),
            scope: Scope::default(),
            encoding: Encoding::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Secret structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct Secret {
    /// base name of generated secrets, or the full name in fixed mode
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "mode")]
    pub mode: Mode,
}

impl Default for Secret {
    fn default() -> Self {
        Self {
            name: DEFAULT_SECRET_NAME.into(),
            mode: Mode::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Console structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct Console {
    #[serde(rename = "enabled")]
    pub enabled: bool,
    #[serde(rename = "hostname")]
    pub hostname: Option<String>,
}

impl Default for Console {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: None,
        }
    }
}

// -----------------------------------------------------------------------------
// Pacing structure

/// Delays are expressed in milliseconds
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct Pacing {
    #[serde(rename = "delay")]
    pub delay: u64,
    #[serde(rename = "interval")]
    pub interval: u64,
    #[serde(rename = "max_interval")]
    pub max_interval: u64,
    #[serde(rename = "timeout")]
    pub timeout: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            interval: 500,
            max_interval: 5_000,
            timeout: 60_000,
        }
    }
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct Configuration {
    #[serde(rename = "email")]
    pub email: Option<String>,
    #[serde(rename = "base_domain")]
    pub base_domain: Option<String>,
    #[serde(rename = "cluster_name")]
    pub cluster_name: Option<String>,
    #[serde(rename = "cluster_domain")]
    pub cluster_domain: Option<String>,
    #[serde(rename = "test")]
    pub test: Option<String>,
    #[serde(rename = "cluster")]
    pub cluster: Cluster,
    #[serde(rename = "certificate")]
    pub certificate: Certificate,
    #[serde(rename = "secret")]
    pub secret: Secret,
    #[serde(rename = "console")]
    pub console: Console,
    #[serde(rename = "pacing")]
    pub pacing: Pacing,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        let builder = Config::builder().add_source(config::File::from(path.to_owned()).required(true));

        Self::finish(builder).map_err(|err| match err {
            Error::Build(err) => Error::File(path, err),
            err => err,
        })
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = Config::builder();
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
        }

        paths.push(PathBuf::from("config"));
        for path in paths {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        Self::finish(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, Error> {
        Self::finish_with(builder, &std::env::vars().collect())
    }

    fn finish_with(
        builder: ConfigBuilder<DefaultState>,
        environment: &Map<String, String>,
    ) -> Result<Self, Error> {
        // only nested variables, a plain `CLUSTER` would shadow the whole section
        let nested = environment
            .iter()
            .filter(|(variable, _)| variable.contains(SEPARATOR))
            .map(|(variable, value)| (variable.to_owned(), value.to_owned()))
            .collect();

        let mut builder = builder.add_source(
            Environment::default()
                .separator(SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("cluster.namespaces")
                .source(Some(nested)),
        );

        for (variable, key) in ENVIRONMENT_VARIABLES {
            if let Some(value) = environment.get(variable) {
                builder = builder
                    .set_override(key, value.to_owned())
                    .map_err(|err| Error::Override(key.to_string(), err))?;
            }
        }

        builder
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    /// checks that required values are present and that the dns provider
    /// credentials are readable, returns the immutable runtime configuration
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub fn validate(&self) -> Result<Runtime, Error> {
        let email = required("EMAIL", &self.email)?;
        let base_domain = required("BASE_DOMAIN", &self.base_domain)?;
        let cluster_domain = match non_empty(&self.cluster_domain) {
            Some(domain) => domain,
            None => format!(
                "{}.{}",
                required("CLUSTER_NAME", &self.cluster_name)?,
                base_domain
            ),
        };

        File::open(&self.certificate.credentials)
            .map_err(|err| Error::Credentials(self.certificate.credentials.to_owned(), err))?;

        Ok(Runtime {
            email,
            base_domain,
            cluster_domain,
            test: non_empty(&self.test).is_some(),
            cluster: self.cluster.to_owned(),
            certificate: self.certificate.to_owned(),
            secret: self.secret.to_owned(),
            console: self.console.to_owned(),
            pacing: self.pacing.to_owned(),
        })
    }
}

// -----------------------------------------------------------------------------
// Runtime structure

/// Validated configuration of one run, it is never mutated
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Runtime {
    pub email: String,
    pub base_domain: String,
    pub cluster_domain: String,
    pub test: bool,
    pub cluster: Cluster,
    pub certificate: Certificate,
    pub secret: Secret,
    pub console: Console,
    pub pacing: Pacing,
}

impl Runtime {
    /// returns the url of the cluster api server
    pub fn endpoint(&self) -> String {
        match &self.cluster.endpoint {
            Some(endpoint) => endpoint.to_owned(),
            None => format!("https://api.{}:6443", self.cluster_domain),
        }
    }

    /// returns the hostname served by the api server
    pub fn api_hostname(&self) -> String {
        format!("api.{}", self.cluster_domain)
    }

    pub fn console_hostname(&self) -> String {
        match &self.console.hostname {
            Some(hostname) => hostname.to_owned(),
            None => format!("origins.{}", self.base_domain),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn required(variable: &'static str, value: &Option<String>) -> Result<String, Error> {
    non_empty(value).ok_or(Error::Missing(variable))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn configuration(credentials: &NamedTempFile) -> Configuration {
        Configuration {
            email: Some("ops@example.com".into()),
            base_domain: Some(" example.com ".into()),
            cluster_name: Some("lab".into()),
            certificate: Certificate {
                credentials: credentials.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn validate_derives_cluster_domain() {
        let credentials = NamedTempFile::new().unwrap();
        let runtime = configuration(&credentials).validate().unwrap();

        assert_eq!(runtime.base_domain, "example.com");
        assert_eq!(runtime.cluster_domain, "lab.example.com");
        assert_eq!(runtime.endpoint(), "https://api.lab.example.com:6443");
        assert_eq!(runtime.api_hostname(), "api.lab.example.com");
        assert_eq!(runtime.console_hostname(), "origins.example.com");
        assert!(!runtime.test);
    }

    #[test]
    fn validate_names_each_missing_variable() {
        let credentials = NamedTempFile::new().unwrap();

        let mut config = configuration(&credentials);
        config.email = None;
        assert!(matches!(config.validate(), Err(Error::Missing("EMAIL"))));

        let mut config = configuration(&credentials);
        config.base_domain = Some("   ".into());
        assert!(matches!(config.validate(), Err(Error::Missing("BASE_DOMAIN"))));

        let mut config = configuration(&credentials);
        config.cluster_name = None;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Missing("CLUSTER_NAME")));
        assert_eq!(err.to_string(), "missing environment variable 'CLUSTER_NAME'");
    }

    #[test]
    fn validate_reports_first_missing_variable() {
        let credentials = NamedTempFile::new().unwrap();
        let mut config = configuration(&credentials);
        config.base_domain = None;
        config.cluster_name = None;

        assert!(matches!(config.validate(), Err(Error::Missing("BASE_DOMAIN"))));
    }

    #[test]
    fn validate_accepts_joined_cluster_domain() {
        let credentials = NamedTempFile::new().unwrap();
        let mut config = configuration(&credentials);
        config.cluster_name = None;
        config.cluster_domain = Some("ocp.example.org".into());
        config.test = Some("1".into());

        let runtime = config.validate().unwrap();
        assert_eq!(runtime.cluster_domain, "ocp.example.org");
        assert!(runtime.test);
    }

    #[test]
    fn validate_requires_readable_credentials() {
        let credentials = NamedTempFile::new().unwrap();
        let mut config = configuration(&credentials);
        config.certificate.credentials = PathBuf::from("/nonexistent/digitalocean.ini");

        assert!(matches!(config.validate(), Err(Error::Credentials(_, _))));
    }

    #[test]
    fn configuration_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[secret]
name = "wildcard"
mode = "fixed"

[certificate]
scope = "apps"

[pacing]
delay = 10
"#
        )
        .unwrap();

        let config = Configuration::try_from(file.path().to_path_buf()).unwrap();
        assert_eq!(config.secret.name, "wildcard");
        assert_eq!(config.secret.mode, Mode::Fixed);
        assert_eq!(config.certificate.scope, Scope::Apps);
        assert_eq!(config.certificate.plugin, DEFAULT_DNS_PLUGIN);
        assert_eq!(config.pacing.delay, 10);
        assert_eq!(config.cluster.namespaces.len(), 2);
    }

    #[test]
    fn configuration_from_environment() {
        let environment = Map::from_iter([
            ("EMAIL".to_string(), "ops@example.com".to_string()),
            ("CLUSTER_NAME".to_string(), "lab".to_string()),
            ("CERTIFICATE__CREDENTIALS".to_string(), "/run/secrets/do.ini".to_string()),
            ("PACING__DELAY".to_string(), "250".to_string()),
            ("SECRET__MODE".to_string(), "fixed".to_string()),
            ("CLUSTER__NAMESPACES".to_string(), "openshift-ingress,openshift-config,lab".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]);

        let config = Configuration::finish_with(Config::builder(), &environment).unwrap();
        assert_eq!(config.email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.cluster_name.as_deref(), Some("lab"));
        assert_eq!(config.base_domain, None);
        assert_eq!(
            config.certificate.credentials,
            PathBuf::from("/run/secrets/do.ini")
        );
        assert_eq!(config.certificate.plugin, DEFAULT_DNS_PLUGIN);
        assert_eq!(config.pacing.delay, 250);
        assert_eq!(config.secret.mode, Mode::Fixed);
        assert_eq!(
            config.cluster.namespaces,
            vec!["openshift-ingress", "openshift-config", "lab"]
        );
    }
}
