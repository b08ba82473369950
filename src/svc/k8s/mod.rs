//! # Kubernetes module
//!
//! This module provide the kubernetes client, the openshift resources and
//! helpers to interact with them

pub mod client;
pub mod openshift;
pub mod secret;

// -----------------------------------------------------------------------------
// Helpers functions

/// returns the http status code of the failed request, or the error itself
/// when the request did not reach the api server
pub fn status(err: &kube::Error) -> String {
    match err {
        kube::Error::Api(response) => response.code.to_string(),
        err => err.to_string(),
    }
}
