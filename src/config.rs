//! YAML declaration loader for the CLI driver.
//!
//! Turns a declaration file into an [`AccountSpec`], and renders an
//! [`AccountSpec`] back into the same file shape so that import output can
//! be fed straight back into `apply`. Kept deliberately thin; the
//! reconciler only ever sees the resulting spec value.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{AccountSpec, Automount, Identity, NameSource};

/// On-disk declaration shape.
///
/// ```yaml
/// namespace: ns1
/// name: sa-foo            # or generateName: sa-foo-
/// labels:
///   app: demo
/// secrets: [sa-foo-one, sa-foo-two]
/// imagePullSecrets: [sa-foo-three]
/// automount: true         # absent means "defer to platform default"
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Declaration {
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    image_pull_secrets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    automount: Option<bool>,
}

impl Declaration {
    fn from_spec(spec: &AccountSpec) -> Self {
        Self {
            namespace: spec.identity.namespace.clone(),
            name: spec.identity.declared_name().map(String::from),
            generate_name: spec.identity.generate_prefix().map(String::from),
            labels: spec.labels.clone(),
            annotations: spec.annotations.clone(),
            secrets: spec.secrets.clone(),
            image_pull_secrets: spec.image_pull_secrets.clone(),
            automount: spec.automount.as_bool(),
        }
    }

    fn into_spec(self) -> Result<AccountSpec> {
        let name = match (self.name, self.generate_name) {
            (Some(name), None) => NameSource::Name(name),
            (None, Some(prefix)) => NameSource::GenerateName(prefix),
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "declare either name or generateName, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::Config(
                    "one of name or generateName is required".to_string(),
                ))
            }
        };

        Ok(AccountSpec {
            identity: Identity {
                namespace: self.namespace,
                name,
            },
            labels: self.labels,
            annotations: self.annotations,
            secrets: self.secrets,
            image_pull_secrets: self.image_pull_secrets,
            automount: Automount::from_bool(self.automount),
        })
    }
}

/// Load a declaration file.
pub fn load_spec(path: &Path) -> Result<AccountSpec> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_spec(&raw)
}

pub fn parse_spec(raw: &str) -> Result<AccountSpec> {
    let declaration: Declaration = serde_yaml::from_str(raw)
        .map_err(|e| Error::Config(format!("invalid declaration: {e}")))?;
    declaration.into_spec()
}

/// Render a spec in the declaration file shape, so the output of `import`
/// loads back through [`parse_spec`] unchanged.
pub fn render_spec(spec: &AccountSpec) -> Result<String> {
    serde_yaml::to_string(&Declaration::from_spec(spec))
        .map_err(|e| Error::Config(format!("cannot render declaration: {e}")))
}
