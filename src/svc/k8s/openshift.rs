//! # OpenShift module
//!
//! This module provide the openshift resources which reference the serving
//! certificate secret and helpers to repoint them

use kube::{
    api::{Patch, PatchParams},
    Api, Client, CustomResource,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

// -----------------------------------------------------------------------------
// Constants

pub const INGRESS_OPERATOR_NAMESPACE: &str = "openshift-ingress-operator";
pub const DEFAULT_INGRESS_CONTROLLER: &str = "default";
pub const CLUSTER: &str = "cluster";
pub const CONSOLE_ROUTE: &str = "console";
pub const CONSOLE_NAMESPACE: &str = "openshift-console";

// -----------------------------------------------------------------------------
// SecretReference structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct SecretReference {
    #[serde(rename = "name")]
    pub name: String,
}

impl From<&str> for SecretReference {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// IngressControllerSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[kube(group = "operator.openshift.io")]
#[kube(version = "v1")]
#[kube(kind = "IngressController")]
#[kube(plural = "ingresscontrollers")]
#[kube(namespaced)]
pub struct IngressControllerSpec {
    #[serde(
        rename = "defaultCertificate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_certificate: Option<SecretReference>,
}

// -----------------------------------------------------------------------------
// ApiServerSpec structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct NamedCertificate {
    #[serde(rename = "names")]
    pub names: Vec<String>,
    #[serde(rename = "servingCertificate")]
    pub serving_certificate: SecretReference,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ServingCerts {
    #[serde(rename = "namedCertificates", default)]
    pub named_certificates: Vec<NamedCertificate>,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[kube(group = "config.openshift.io")]
#[kube(version = "v1")]
#[kube(kind = "APIServer")]
#[kube(struct = "ApiServer")]
#[kube(plural = "apiservers")]
pub struct ApiServerSpec {
    #[serde(
        rename = "servingCerts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub serving_certs: Option<ServingCerts>,
}

// -----------------------------------------------------------------------------
// ClusterIngressSpec structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct ComponentRoute {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "hostname")]
    pub hostname: String,
    #[serde(
        rename = "servingCertKeyPairSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub serving_cert_key_pair_secret: Option<SecretReference>,
}

/// Cluster wide ingress configuration, it carries the console route
#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[kube(group = "config.openshift.io")]
#[kube(version = "v1")]
#[kube(kind = "Ingress")]
#[kube(struct = "ClusterIngress")]
#[kube(plural = "ingresses")]
pub struct ClusterIngressSpec {
    #[serde(
        rename = "componentRoutes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub component_routes: Vec<ComponentRoute>,
}

// -----------------------------------------------------------------------------
// SpecPatch structure

/// Body of a merge patch which only touches the spec of a resource
#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct SpecPatch<T> {
    #[serde(rename = "spec")]
    pub spec: T,
}

impl SpecPatch<IngressControllerSpec> {
    pub fn default_certificate(secret: &str) -> Self {
        Self {
            spec: IngressControllerSpec {
                default_certificate: Some(secret.into()),
            },
        }
    }
}

impl SpecPatch<ApiServerSpec> {
    pub fn serving_certificate(hostname: &str, secret: &str) -> Self {
        Self {
            spec: ApiServerSpec {
                serving_certs: Some(ServingCerts {
                    named_certificates: vec![NamedCertificate {
                        names: vec![hostname.to_string()],
                        serving_certificate: secret.into(),
                    }],
                }),
            },
        }
    }
}

impl SpecPatch<ClusterIngressSpec> {
    pub fn console(hostname: &str, secret: &str) -> Self {
        Self {
            spec: ClusterIngressSpec {
                component_routes: vec![ComponentRoute {
                    name: CONSOLE_ROUTE.to_string(),
                    namespace: CONSOLE_NAMESPACE.to_string(),
                    hostname: hostname.to_string(),
                    serving_cert_key_pair_secret: Some(secret.into()),
                }],
            },
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns the name of the secret currently served by the default ingress
/// controller, if any
#[cfg_attr(feature = "trace", tracing::instrument(skip(client)))]
pub async fn default_certificate(client: Client) -> Result<Option<String>, kube::Error> {
    let api: Api<IngressController> = Api::namespaced(client, INGRESS_OPERATOR_NAMESPACE);

    debug!(
        kind = "IngressController",
        namespace = INGRESS_OPERATOR_NAMESPACE,
        name = DEFAULT_INGRESS_CONTROLLER,
        "execute a request to retrieve ingress controller"
    );
    let controller = api.get(DEFAULT_INGRESS_CONTROLLER).await?;

    Ok(controller.spec.default_certificate.map(|reference| reference.name))
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(client)))]
pub async fn patch_ingress_controller(
    client: Client,
    secret: &str,
) -> Result<IngressController, kube::Error> {
    let api: Api<IngressController> = Api::namespaced(client, INGRESS_OPERATOR_NAMESPACE);
    let patch = SpecPatch::default_certificate(secret);

    debug!(
        kind = "IngressController",
        namespace = INGRESS_OPERATOR_NAMESPACE,
        name = DEFAULT_INGRESS_CONTROLLER,
        "execute patch request on resource"
    );
    api.patch(
        DEFAULT_INGRESS_CONTROLLER,
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(client)))]
pub async fn patch_api_server(
    client: Client,
    hostname: &str,
    secret: &str,
) -> Result<ApiServer, kube::Error> {
    let api: Api<ApiServer> = Api::all(client);
    let patch = SpecPatch::serving_certificate(hostname, secret);

    debug!(kind = "APIServer", name = CLUSTER, "execute patch request on resource");
    api.patch(CLUSTER, &PatchParams::default(), &Patch::Merge(&patch))
        .await
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(client)))]
pub async fn patch_console(
    client: Client,
    hostname: &str,
    secret: &str,
) -> Result<ClusterIngress, kube::Error> {
    let api: Api<ClusterIngress> = Api::all(client);
    let patch = SpecPatch::console(hostname, secret);

    debug!(kind = "Ingress", name = CLUSTER, "execute patch request on resource");
    api.patch(CLUSTER, &PatchParams::default(), &Patch::Merge(&patch))
        .await
}
