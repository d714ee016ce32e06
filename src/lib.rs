//! sa-reconciler: client-side reconciliation for Kubernetes ServiceAccounts.
//!
//! This crate reconciles a user-declared ServiceAccount configuration
//! against the live object in a cluster: field-level diffing, separation of
//! user-declared secret references from platform-injected token secrets,
//! and version-gated behavior around automatic token provisioning
//! (removed in Kubernetes 1.24).

pub mod backoff;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod import;
pub mod model;
pub mod reconciler;
pub mod secrets;

#[cfg(test)]
mod reconciler_test;

pub use crate::capabilities::Capabilities;
pub use crate::client::{AccountClient, KubeAccounts};
pub use crate::error::{Error, Result};
pub use crate::model::{AccountSpec, Automount, Identity, NameSource, ObservedAccount};
pub use crate::reconciler::{AccountReconciler, RetryPolicy};
