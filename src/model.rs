//! Canonical in-memory representation of a managed ServiceAccount.
//!
//! [`AccountSpec`] is the desired state owned by configuration;
//! [`ObservedAccount`] is the server-reported live state, a superset of the
//! declared fields. Observed values are produced fresh on every read and
//! never cached by this crate.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{LocalObjectReference, ObjectReference, ServiceAccount};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the object's name is determined.
///
/// Exactly one of a concrete name or a server-side generate-name prefix may
/// be declared; the enum makes the "exactly one" invariant unrepresentable
/// to violate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameSource {
    /// A concrete name, used verbatim.
    Name(String),
    /// A prefix; the server appends a random suffix on create.
    GenerateName(String),
}

/// Namespace plus name source. Immutable once the object exists: any change
/// forces destroy-and-recreate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    #[serde(flatten)]
    pub name: NameSource,
}

impl Identity {
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: NameSource::Name(name.into()),
        }
    }

    pub fn generated(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: NameSource::GenerateName(prefix.into()),
        }
    }

    /// The concrete declared name, if one was declared.
    pub fn declared_name(&self) -> Option<&str> {
        match &self.name {
            NameSource::Name(n) => Some(n),
            NameSource::GenerateName(_) => None,
        }
    }

    /// The generate-name prefix, if one was declared.
    pub fn generate_prefix(&self) -> Option<&str> {
        match &self.name {
            NameSource::Name(_) => None,
            NameSource::GenerateName(p) => Some(p),
        }
    }

    /// Whether a server-assigned name satisfies this identity.
    ///
    /// A concrete name must match exactly; a generate-name prefix must be a
    /// prefix of the assigned name.
    pub fn accepts_name(&self, assigned: &str) -> bool {
        match &self.name {
            NameSource::Name(n) => n == assigned,
            NameSource::GenerateName(p) => assigned.starts_with(p.as_str()),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            NameSource::Name(n) => write!(f, "{}/{}", self.namespace, n),
            NameSource::GenerateName(p) => write!(f, "{}/{}*", self.namespace, p),
        }
    }
}

/// Tri-state automount flag. `Unset` defers to the platform default and is
/// semantically distinct from an explicit `Disabled`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Automount {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl Automount {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Automount::Unset => None,
            Automount::Enabled => Some(true),
            Automount::Disabled => Some(false),
        }
    }

    pub fn from_bool(value: Option<bool>) -> Self {
        match value {
            None => Automount::Unset,
            Some(true) => Automount::Enabled,
            Some(false) => Automount::Disabled,
        }
    }
}

/// Desired state of one ServiceAccount, as declared by the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSpec {
    pub identity: Identity,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Secret references explicitly listed by the user. The platform may
    /// report more (the injected token secret); those are never declared
    /// here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    #[serde(default)]
    pub automount: Automount,
}

impl AccountSpec {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            secrets: Vec::new(),
            image_pull_secrets: Vec::new(),
            automount: Automount::Unset,
        }
    }

    /// Render the declared state as the wire object submitted on create.
    pub fn to_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: self.identity.declared_name().map(String::from),
                generate_name: self.identity.generate_prefix().map(String::from),
                namespace: Some(self.identity.namespace.clone()),
                labels: if self.labels.is_empty() {
                    None
                } else {
                    Some(self.labels.clone())
                },
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations.clone())
                },
                ..Default::default()
            },
            secrets: if self.secrets.is_empty() {
                None
            } else {
                Some(
                    self.secrets
                        .iter()
                        .map(|n| ObjectReference {
                            name: Some(n.clone()),
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            image_pull_secrets: if self.image_pull_secrets.is_empty() {
                None
            } else {
                Some(
                    self.image_pull_secrets
                        .iter()
                        .map(|n| LocalObjectReference {
                            name: Some(n.clone()),
                        })
                        .collect(),
                )
            },
            automount_service_account_token: self.automount.as_bool(),
        }
    }
}

/// Server-reported live state of one ServiceAccount.
///
/// `all_secrets` and `all_image_pull_secrets` carry everything the server
/// reports, declared and platform-injected alike; the secret-set matcher
/// separates the two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedAccount {
    pub namespace: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_image_pull_secrets: Vec<String>,

    #[serde(default)]
    pub automount: Automount,

    // Server-assigned; read-only. Used for optimistic concurrency and
    // identity verification, never set by the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

impl ObservedAccount {
    /// Build from the wire object returned by the API server.
    ///
    /// Unnamed secret references are skipped: a reference without a name
    /// cannot be matched or declared. Fails if the server omitted the
    /// object's own name or namespace.
    pub fn from_service_account(sa: &ServiceAccount) -> Result<Self> {
        let name = sa
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Config("server returned a ServiceAccount without a name".to_string()))?;
        let namespace = sa.metadata.namespace.clone().ok_or_else(|| {
            Error::Config("server returned a ServiceAccount without a namespace".to_string())
        })?;

        let all_secrets = sa
            .secrets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|r| r.name.clone())
            .collect();
        let all_image_pull_secrets = sa
            .image_pull_secrets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|r| r.name.clone())
            .collect();

        Ok(Self {
            namespace,
            name,
            labels: sa.metadata.labels.clone().unwrap_or_default(),
            annotations: sa.metadata.annotations.clone().unwrap_or_default(),
            all_secrets,
            all_image_pull_secrets,
            automount: Automount::from_bool(sa.automount_service_account_token),
            resource_version: sa.metadata.resource_version.clone(),
            uid: sa.metadata.uid.clone(),
            generation: sa.metadata.generation,
        })
    }

    /// The platform-injected token secret, when the cluster provisions one.
    ///
    /// Named `<account>-token-<suffix>`; `None` on clusters that no longer
    /// auto-provision token secrets or before the token controller has run.
    pub fn default_token_secret(&self) -> Option<&str> {
        self.all_secrets
            .iter()
            .map(String::as_str)
            .find(|s| crate::secrets::is_token_secret_name(s, &self.name))
    }

    /// `namespace/name` identifier usable for import.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
