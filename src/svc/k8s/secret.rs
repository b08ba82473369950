//! # Secret module
//!
//! This module provide the tls secret payload published on the cluster and
//! helpers to create, update and delete it

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client, Resource,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::svc::certificate::encoder::Material;

// -----------------------------------------------------------------------------
// Constants

pub const AUTOMATION_LABEL: &str = "created-via-automation";
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const CERTIFICATE_KEY: &str = "tls.crt";
pub const PRIVATE_KEY_KEY: &str = "tls.key";
pub const SUFFIX_LENGTH: usize = 5;

// -----------------------------------------------------------------------------
// TlsSecret structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Metadata {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "labels", default)]
    pub labels: BTreeMap<String, String>,
}

/// Secret payload whose data is already base64 encoded
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct TlsSecret {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "type")]
    pub kind_of_secret: String,
    #[serde(rename = "metadata")]
    pub metadata: Metadata,
    #[serde(rename = "data")]
    pub data: BTreeMap<String, String>,
}

impl TlsSecret {
    pub fn new(name: &str, namespace: Option<String>, material: &Material) -> Self {
        Self {
            api_version: "v1".into(),
            kind: "Secret".into(),
            kind_of_secret: TLS_SECRET_TYPE.into(),
            metadata: Metadata {
                name: name.to_string(),
                namespace,
                labels: BTreeMap::from([(AUTOMATION_LABEL.to_string(), "true".to_string())]),
            },
            data: BTreeMap::from([
                (CERTIFICATE_KEY.to_string(), material.certificate.to_owned()),
                (PRIVATE_KEY_KEY.to_string(), material.private_key.to_owned()),
            ]),
        }
    }
}

// -----------------------------------------------------------------------------
// Publication enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Publication {
    Created,
    Updated,
}

impl Display for Publication {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns `<base>-<suffix>` with a random lowercase alphanumeric suffix which
/// never equals the previous name
pub fn generate_name(base: &str, previous: Option<&str>) -> String {
    loop {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LENGTH)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();

        let name = format!("{}-{}", base, suffix);
        if previous != Some(name.as_str()) {
            return name;
        }
    }
}

pub async fn get(client: Client, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    debug!(kind = "Secret", namespace = namespace, name = name, "execute a request to retrieve secret");
    match api.get(name).await {
        Ok(secret) => Ok(Some(secret)),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(err) => Err(err),
    }
}

pub async fn create(client: Client, namespace: &str, secret: &TlsSecret) -> Result<Secret, kube::Error> {
    let body = serde_json::to_vec(secret).map_err(kube::Error::SerdeError)?;
    let request = kube::core::Request::new(Secret::url_path(&(), Some(namespace)))
        .create(&PostParams::default(), body)
        .map_err(kube::Error::BuildRequest)?;

    debug!(kind = "Secret", namespace = namespace, name = &secret.metadata.name, "execute a request to create a secret");
    client.request::<Secret>(request).await
}

pub async fn update(client: Client, namespace: &str, secret: &TlsSecret) -> Result<Secret, kube::Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    debug!(kind = "Secret", namespace = namespace, name = &secret.metadata.name, "execute patch request on resource");
    api.patch(&secret.metadata.name, &PatchParams::default(), &Patch::Merge(secret))
        .await
}

/// creates the secret if there is none with this name in the namespace,
/// otherwise merge the payload into the existing one
pub async fn upsert(client: Client, namespace: &str, secret: &TlsSecret) -> Result<Publication, kube::Error> {
    if get(client.to_owned(), namespace, &secret.metadata.name).await?.is_some() {
        update(client, namespace, secret).await?;
        return Ok(Publication::Updated);
    }

    create(client, namespace, secret).await?;
    Ok(Publication::Created)
}

pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    debug!(kind = "Secret", namespace = namespace, name = name, "execute a request to delete a secret");
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::svc::k8s::client;

    fn material() -> Material {
        Material {
            certificate: "Y2VydA==".into(),
            private_key: "a2V5".into(),
        }
    }

    fn secret_json(name: &str, namespace: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": namespace},
            "type": TLS_SECRET_TYPE
        })
    }

    async fn methods(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| request.method.to_string())
            .collect()
    }

    #[test]
    fn payload_carries_label_and_material() {
        assert_eq!(
            serde_json::to_value(TlsSecret::new("certs-abcde", None, &material())).unwrap(),
            json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "type": "kubernetes.io/tls",
                "metadata": {
                    "name": "certs-abcde",
                    "labels": {"created-via-automation": "true"}
                },
                "data": {"tls.crt": "Y2VydA==", "tls.key": "a2V5"}
            })
        );
    }

    #[test]
    fn generated_names_share_prefix_and_suffix_length() {
        let name = generate_name("certs", None);
        let suffix = name.strip_prefix("certs-").unwrap();

        assert_eq!(suffix.len(), SUFFIX_LENGTH);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn generated_names_differ_from_previous() {
        let mut previous = generate_name("certs", None);
        for _ in 0..1_000 {
            let name = generate_name("certs", Some(&previous));

            assert_ne!(name, previous);
            previous = name;
        }
    }

    #[tokio::test]
    async fn upsert_creates_missing_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/openshift-config/secrets/certs"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/openshift-config/secrets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(secret_json("certs", "openshift-config")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client::try_new(&server.uri(), "sa-token", Some(vec![]), false).unwrap();
        let secret = TlsSecret::new("certs", Some("openshift-config".into()), &material());

        assert_eq!(
            upsert(client, "openshift-config", &secret).await.unwrap(),
            Publication::Created
        );
        assert_eq!(methods(&server).await, vec!["GET", "POST"]);
    }

    #[tokio::test]
    async fn upsert_updates_existing_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/openshift-config/secrets/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(secret_json("certs", "openshift-config")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/namespaces/openshift-config/secrets/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(secret_json("certs", "openshift-config")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client::try_new(&server.uri(), "sa-token", Some(vec![]), false).unwrap();
        let secret = TlsSecret::new("certs", Some("openshift-config".into()), &material());

        assert_eq!(
            upsert(client, "openshift-config", &secret).await.unwrap(),
            Publication::Updated
        );
        assert_eq!(methods(&server).await, vec!["GET", "PATCH"]);
    }

    #[tokio::test]
    async fn create_posts_typed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/openshift-ingress/secrets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(secret_json("certs-abcde", "openshift-ingress")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client::try_new(&server.uri(), "sa-token", Some(vec![]), false).unwrap();
        let secret = TlsSecret::new("certs-abcde", Some("openshift-ingress".into()), &material());
        create(client, "openshift-ingress", &secret).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: TlsSecret = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, secret);
    }

    #[tokio::test]
    async fn get_propagates_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client::try_new(&server.uri(), "sa-token", Some(vec![]), false).unwrap();
        let result = get(client, "openshift-config", "certs").await;

        assert!(matches!(result, Err(kube::Error::Api(err)) if err.code == 500));
    }
}
