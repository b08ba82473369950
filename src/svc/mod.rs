//! # Services module
//!
//! This module provide services to obtain certificates, interact with
//! kubernetes and helpers to do so.
pub mod certificate;
pub mod cfg;
pub mod k8s;
pub mod pacing;
pub mod pipeline;
