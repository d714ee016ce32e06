//! Secret-set matcher.
//!
//! Separates the secret references reported by the API server into the
//! user-declared subset and the platform-injected remainder, and verifies a
//! reported set against a list of expected patterns. Used on the read path
//! (so injected secrets are never reported as drift) and on the
//! import/destroy verification path.

use std::collections::BTreeSet;

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

/// One expected reference: either an exact declared name or the
/// auto-provisioned token pattern `<account>-token-<suffix>` for a given
/// account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretExpectation {
    Exact(String),
    Token { account: String },
}

impl SecretExpectation {
    fn matches(&self, reported: &str) -> bool {
        match self {
            SecretExpectation::Exact(name) => name == reported,
            SecretExpectation::Token { account } => is_token_secret_name(reported, account),
        }
    }

    fn describe(&self) -> String {
        match self {
            SecretExpectation::Exact(name) => name.clone(),
            SecretExpectation::Token { account } => format!("{account}-token-<suffix>"),
        }
    }
}

/// Whether `candidate` matches the platform's injected token-secret naming
/// convention for `account`: `<account>-token-<suffix>` with a non-empty
/// lowercase alphanumeric suffix.
pub fn is_token_secret_name(candidate: &str, account: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(account) else {
        return false;
    };
    let Some(suffix) = rest.strip_prefix("-token-") else {
        return false;
    };
    !suffix.is_empty()
        && suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Reported secret references split into user-attributable and
/// platform-injected parts. Reported order is preserved within each part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretSplit {
    pub declared: Vec<String>,
    pub injected: Vec<String>,
}

/// Partition `reported` for the given account.
///
/// A reference counts as injected only when it matches the token pattern and
/// was not explicitly declared; everything else is attributed to the user.
/// This also drives import hydration, where no prior declaration exists and
/// `declared` is empty.
pub fn split(reported: &[String], declared: &[String], account: &str) -> SecretSplit {
    let declared_set: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
    let mut out = SecretSplit::default();
    for name in reported {
        if !declared_set.contains(name.as_str()) && is_token_secret_name(name, account) {
            out.injected.push(name.clone());
        } else {
            out.declared.push(name.clone());
        }
    }
    out
}

/// Verify a reported reference list against the expected patterns.
///
/// Matching is existence-based per pattern: each expectation must be
/// satisfied by at least one reported name; several reported names may fall
/// under the same pattern class. An empty expectation set requires an empty
/// reported list, except that on auto-provisioning clusters a reported list
/// consisting solely of token-pattern entries also passes.
///
/// On clusters without auto-provisioning, token expectations are skipped
/// entirely; only exact declared references are checked.
pub fn verify(
    reported: &[String],
    expected: &[SecretExpectation],
    account: &str,
    caps: Capabilities,
) -> Result<()> {
    let id = account.to_string();
    let applicable: Vec<&SecretExpectation> = expected
        .iter()
        .filter(|e| caps.auto_token_secret || matches!(e, SecretExpectation::Exact(_)))
        .collect();

    if applicable.is_empty() {
        let stray: Vec<&str> = reported
            .iter()
            .map(String::as_str)
            .filter(|s| !(caps.auto_token_secret && is_token_secret_name(s, account)))
            .collect();
        if stray.is_empty() {
            return Ok(());
        }
        return Err(Error::SecretMatch {
            id,
            message: format!("expected no secret references, server reports {stray:?}"),
        });
    }

    for expectation in applicable {
        if !reported.iter().any(|r| expectation.matches(r)) {
            return Err(Error::SecretMatch {
                id,
                message: format!(
                    "no reported secret matches {:?} (server reports {:?})",
                    expectation.describe(),
                    reported
                ),
            });
        }
    }
    Ok(())
}

/// The expectation set for a declared secret list: one exact pattern per
/// declared name, plus the token pattern (only meaningful on
/// auto-provisioning clusters; [`verify`] skips it elsewhere).
pub fn expectations_for(declared: &[String], account: &str) -> Vec<SecretExpectation> {
    let mut expected: Vec<SecretExpectation> = declared
        .iter()
        .map(|n| SecretExpectation::Exact(n.clone()))
        .collect();
    expected.push(SecretExpectation::Token {
        account: account.to_string(),
    });
    expected
}
