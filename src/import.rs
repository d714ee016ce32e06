//! Import hydration: turning an external `<namespace>/<name>` identifier
//! into an identity, and a live object into a desired-state baseline.

use crate::error::{Error, Result};
use crate::model::{AccountSpec, Identity, ObservedAccount};
use crate::secrets;

/// Parse an external identifier into `(namespace, name)`.
///
/// Exactly one `/` separator, both sides non-empty; anything else is a
/// caller programming error.
pub fn parse_identifier(identifier: &str) -> Result<(String, String)> {
    let mut parts = identifier.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(Error::MalformedIdentifier(identifier.to_string())),
    }
}

/// Reconstruct a desired-state baseline from a live object.
///
/// Declared secrets are the user-attributable part of the reported list;
/// the injected token secret is never imported as declared. The automount
/// tri-state is preserved exactly as reported — the platform may silently
/// default this field, so import never collapses unset to false.
pub fn hydrate_spec(observed: &ObservedAccount) -> AccountSpec {
    let split = secrets::split(&observed.all_secrets, &[], &observed.name);
    AccountSpec {
        identity: Identity::named(&observed.namespace, &observed.name),
        labels: observed.labels.clone(),
        annotations: observed.annotations.clone(),
        secrets: split.declared,
        image_pull_secrets: observed.all_image_pull_secrets.clone(),
        automount: observed.automount,
    }
}
