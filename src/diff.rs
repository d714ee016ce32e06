//! Field-level diff between desired and observed account state.
//!
//! Produces the minimal set of in-place update operations, or signals that
//! the object must be destroyed and recreated (identity is immutable).
//! Platform-injected secrets are classified out by the secret-set matcher
//! before comparison, so they never show up as drift.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{LocalObjectReference, ObjectReference, ServiceAccount};

use crate::model::{AccountSpec, Automount, ObservedAccount};
use crate::secrets;

/// One in-place update operation. Map and list fields use full-replace
/// semantics: keys present on the server but absent from the desired value
/// are removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldOp {
    ReplaceLabels(std::collections::BTreeMap<String, String>),
    ReplaceAnnotations(std::collections::BTreeMap<String, String>),
    /// The final secret list to submit: the declared references in declared
    /// order, followed by the injected entries being preserved.
    ReplaceSecrets(Vec<String>),
    ReplaceImagePullSecrets(Vec<String>),
    SetAutomount(Automount),
}

impl FieldOp {
    /// A short field name for logs.
    pub fn field(&self) -> &'static str {
        match self {
            FieldOp::ReplaceLabels(_) => "labels",
            FieldOp::ReplaceAnnotations(_) => "annotations",
            FieldOp::ReplaceSecrets(_) => "secrets",
            FieldOp::ReplaceImagePullSecrets(_) => "imagePullSecrets",
            FieldOp::SetAutomount(_) => "automount",
        }
    }

    /// Apply this operation onto a wire object about to be replaced.
    pub fn apply_to(&self, sa: &mut ServiceAccount) {
        match self {
            FieldOp::ReplaceLabels(labels) => {
                sa.metadata.labels = if labels.is_empty() {
                    None
                } else {
                    Some(labels.clone())
                };
            }
            FieldOp::ReplaceAnnotations(annotations) => {
                sa.metadata.annotations = if annotations.is_empty() {
                    None
                } else {
                    Some(annotations.clone())
                };
            }
            FieldOp::ReplaceSecrets(names) => {
                sa.secrets = if names.is_empty() {
                    None
                } else {
                    Some(
                        names
                            .iter()
                            .map(|n| ObjectReference {
                                name: Some(n.clone()),
                                ..Default::default()
                            })
                            .collect(),
                    )
                };
            }
            FieldOp::ReplaceImagePullSecrets(names) => {
                sa.image_pull_secrets = if names.is_empty() {
                    None
                } else {
                    Some(
                        names
                            .iter()
                            .map(|n| LocalObjectReference {
                                name: Some(n.clone()),
                            })
                            .collect(),
                    )
                };
            }
            FieldOp::SetAutomount(automount) => {
                sa.automount_service_account_token = automount.as_bool();
            }
        }
    }
}

/// Outcome of diffing desired against observed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Desired and observed agree; nothing to do.
    Unchanged,
    /// In-place update with the listed field operations, in a fixed order.
    Update(Vec<FieldOp>),
    /// The identity (name or namespace) changed; the object must be
    /// destroyed and recreated. Attribute deltas are discarded — they are
    /// reapplied on the freshly created object.
    Recreate,
}

/// Compare `desired` against `observed`.
///
/// Diffing an observed object against the declaration that produced it yields
/// [`DiffOutcome::Unchanged`]. A desired generate-name prefix accepts any
/// observed name carrying that prefix; the server filling in the suffix is
/// not an identity change.
pub fn diff(desired: &AccountSpec, observed: &ObservedAccount) -> DiffOutcome {
    if desired.identity.namespace != observed.namespace
        || !desired.identity.accepts_name(&observed.name)
    {
        return DiffOutcome::Recreate;
    }

    let mut ops = Vec::new();

    if desired.labels != observed.labels {
        ops.push(FieldOp::ReplaceLabels(desired.labels.clone()));
    }
    if desired.annotations != observed.annotations {
        ops.push(FieldOp::ReplaceAnnotations(desired.annotations.clone()));
    }

    let split = secrets::split(&observed.all_secrets, &desired.secrets, &observed.name);
    if as_set(&desired.secrets) != as_set(&split.declared) {
        let mut replacement = desired.secrets.clone();
        replacement.extend(split.injected);
        ops.push(FieldOp::ReplaceSecrets(replacement));
    }

    if as_set(&desired.image_pull_secrets) != as_set(&observed.all_image_pull_secrets) {
        ops.push(FieldOp::ReplaceImagePullSecrets(
            desired.image_pull_secrets.clone(),
        ));
    }

    if desired.automount != observed.automount {
        ops.push(FieldOp::SetAutomount(desired.automount));
    }

    if ops.is_empty() {
        DiffOutcome::Unchanged
    } else {
        DiffOutcome::Update(ops)
    }
}

// Reference lists are compared as sets: reordering a declared list is not
// drift, only membership changes are.
fn as_set(names: &[String]) -> BTreeSet<&str> {
    names.iter().map(String::as_str).collect()
}
