//! Lifecycle tests for the reconciler against an in-memory fake cluster.
//!
//! The fake implements [`AccountClient`] and simulates the server behavior
//! the reconciler depends on: 404/409 answers, optimistic concurrency on
//! replace, server-side name generation, and — on pre-1.24 clusters —
//! injection of a `<name>-token-<suffix>` secret after create.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, ServiceAccount};
use kube::core::ErrorResponse;

use crate::capabilities::Capabilities;
use crate::client::AccountClient;
use crate::error::Error;
use crate::model::{AccountSpec, Automount, Identity};
use crate::reconciler::{AccountReconciler, RetryPolicy};

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    })
}

fn transient_error() -> kube::Error {
    kube::Error::Service(Box::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )))
}

/// In-memory stand-in for the API server, scoped to ServiceAccounts.
struct FakeCluster {
    caps: Capabilities,
    state: Mutex<HashMap<(String, String), ServiceAccount>>,
    serial: AtomicU64,
    /// 409 answers to inject into upcoming replace calls.
    conflicts: AtomicU32,
    /// Transport failures to inject into upcoming calls.
    transients: AtomicU32,
    /// When set, delete acknowledges but the object never disappears.
    stuck_deletes: AtomicBool,
    /// When set, generated names ignore the requested prefix.
    assign_name: Mutex<Option<String>>,
}

impl FakeCluster {
    fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            state: Mutex::new(HashMap::new()),
            serial: AtomicU64::new(1),
            conflicts: AtomicU32::new(0),
            transients: AtomicU32::new(0),
            stuck_deletes: AtomicBool::new(false),
            assign_name: Mutex::new(None),
        }
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst)
    }

    fn maybe_fail_transient(&self) -> Result<(), kube::Error> {
        if self
            .transients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(transient_error());
        }
        Ok(())
    }

    fn uid(&self, namespace: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|sa| sa.metadata.uid.clone())
    }
}

#[async_trait]
impl AccountClient for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<ServiceAccount, kube::Error> {
        self.maybe_fail_transient()?;
        self.state
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn create(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.maybe_fail_transient()?;

        let serial = self.next_serial();
        let name = match (&account.metadata.name, &account.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => self
                .assign_name
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| format!("{prefix}{serial:x}")),
            (None, None) => return Err(api_error(422, "Invalid")),
        };

        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if state.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut stored = account.clone();
        stored.metadata.name = Some(name.clone());
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(format!("uid-{serial}"));
        stored.metadata.resource_version = Some("1".to_string());
        stored.metadata.generation = Some(1);

        // Pre-1.24 servers inject a token secret for every account.
        if self.caps.auto_token_secret {
            stored
                .secrets
                .get_or_insert_with(Vec::new)
                .push(ObjectReference {
                    name: Some(format!("{name}-token-{serial:x}")),
                    ..Default::default()
                });
        }

        state.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.maybe_fail_transient()?;
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(api_error(409, "Conflict"));
        }

        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let current = state.get(&key).ok_or_else(|| api_error(404, "NotFound"))?;

        if account.metadata.resource_version != current.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }

        let next_version = self.serial.fetch_add(1, Ordering::SeqCst);
        let mut stored = account.clone();
        stored.metadata.resource_version = Some(next_version.to_string());
        stored.metadata.generation = current.metadata.generation.map(|g| g + 1);
        state.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.maybe_fail_transient()?;
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        if !state.contains_key(&key) {
            return Err(api_error(404, "NotFound"));
        }
        if !self.stuck_deletes.load(Ordering::SeqCst) {
            state.remove(&key);
        }
        Ok(())
    }
}

const LEGACY: Capabilities = Capabilities {
    auto_token_secret: true,
};
const MODERN: Capabilities = Capabilities {
    auto_token_secret: false,
};

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        delete_timeout: Duration::from_millis(100),
        token_wait: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    }
}

fn reconciler(caps: Capabilities) -> AccountReconciler<FakeCluster> {
    AccountReconciler::with_policy(FakeCluster::new(caps), caps, test_policy())
}

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn full_spec(name: &str) -> AccountSpec {
    let mut spec = AccountSpec::new(Identity::named("ns1", name));
    spec.labels.insert("app".to_string(), "demo".to_string());
    spec.annotations
        .insert("team".to_string(), "platform".to_string());
    spec.secrets = vec![format!("{name}-one"), format!("{name}-two")];
    spec.image_pull_secrets = vec![format!("{name}-three"), format!("{name}-four")];
    spec.automount = Automount::Enabled;
    spec
}

#[tokio::test]
async fn test_create_read_back_on_legacy_cluster() {
    let r = reconciler(LEGACY);
    let observed = r.create(&full_spec("sa-foo")).await.unwrap();

    // Two declared plus the injected token secret.
    assert_eq!(observed.all_secrets.len(), 3);
    assert!(observed
        .default_token_secret()
        .unwrap()
        .starts_with("sa-foo-token-"));
    assert_eq!(observed.all_image_pull_secrets.len(), 2);
    assert_eq!(observed.automount, Automount::Enabled);
    assert!(observed.resource_version.is_some());
    assert!(observed.uid.is_some());
}

#[tokio::test]
async fn test_create_read_back_on_modern_cluster() {
    let r = reconciler(MODERN);
    let observed = r.create(&full_spec("sa-foo")).await.unwrap();

    // No auto-provisioning: allSecrets reduces to exactly the declaration.
    assert_eq!(observed.all_secrets, names(&["sa-foo-one", "sa-foo-two"]));
    assert_eq!(observed.default_token_secret(), None);
    assert_eq!(observed.all_image_pull_secrets.len(), 2);
}

#[tokio::test]
async fn test_create_without_declared_secrets() {
    let r = reconciler(MODERN);
    let observed = r
        .create(&AccountSpec::new(Identity::named("ns1", "sa-bare")))
        .await
        .unwrap();
    assert!(observed.all_secrets.is_empty());
    assert_eq!(observed.automount, Automount::Unset);

    let r = reconciler(LEGACY);
    let observed = r
        .create(&AccountSpec::new(Identity::named("ns1", "sa-bare")))
        .await
        .unwrap();
    assert_eq!(observed.all_secrets.len(), 1);
    assert!(observed.default_token_secret().is_some());
}

#[tokio::test]
async fn test_create_duplicate_identity_is_fatal() {
    let r = reconciler(MODERN);
    let spec = full_spec("sa-dup");
    r.create(&spec).await.unwrap();
    let err = r.create(&spec).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_create_with_generated_name() {
    let r = reconciler(LEGACY);
    let mut spec = AccountSpec::new(Identity::generated("ns1", "sa-gen-"));
    spec.automount = Automount::Enabled;

    let observed = r.create(&spec).await.unwrap();
    assert!(observed.name.starts_with("sa-gen-"));
    // The token secret is named after the assigned name, not the prefix.
    assert!(observed
        .default_token_secret()
        .unwrap()
        .starts_with(&format!("{}-token-", observed.name)));
}

#[tokio::test]
async fn test_create_rejects_assigned_name_outside_declared_prefix() {
    let r = reconciler(MODERN);
    *r.client().assign_name.lock().unwrap() = Some("other-1a".to_string());

    let err = r
        .create(&AccountSpec::new(Identity::generated("ns1", "sa-gen-")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_create_retries_transient_errors() {
    let r = reconciler(MODERN);
    r.client().transients.store(2, Ordering::SeqCst);
    let observed = r.create(&full_spec("sa-flaky")).await.unwrap();
    assert_eq!(observed.name, "sa-flaky");
}

#[tokio::test]
async fn test_create_gives_up_after_bounded_transient_retries() {
    let r = reconciler(MODERN);
    r.client().transients.store(10, Ordering::SeqCst);
    let err = r.create(&full_spec("sa-down")).await.unwrap_err();
    assert!(matches!(err, Error::Transient { .. }));
}

#[tokio::test]
async fn test_read_absent_is_none_not_an_error() {
    let r = reconciler(MODERN);
    assert!(r.read("ns1", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_applies_field_changes_in_place() {
    let r = reconciler(LEGACY);
    let spec = full_spec("sa-upd");
    let baseline = r.create(&spec).await.unwrap();
    let token = baseline.default_token_secret().unwrap().to_string();
    let uid = baseline.uid.clone();

    let mut desired = spec.clone();
    desired.secrets = names(&["sa-upd-one"]);
    desired.image_pull_secrets = names(&["sa-upd-two", "sa-upd-three", "sa-upd-four"]);
    desired.automount = Automount::Disabled;
    desired.labels.remove("app");

    let updated = r.update(&desired, &baseline).await.unwrap();
    // Same object, updated in place.
    assert_eq!(updated.uid, uid);
    // Declared list replaced; the injected token secret is preserved.
    assert_eq!(updated.all_secrets, vec!["sa-upd-one".to_string(), token]);
    assert_eq!(updated.all_image_pull_secrets.len(), 3);
    assert_eq!(updated.automount, Automount::Disabled);
    assert!(updated.labels.is_empty());
}

#[tokio::test]
async fn test_update_without_drift_is_a_no_op() {
    let r = reconciler(LEGACY);
    let spec = full_spec("sa-idle");
    let baseline = r.create(&spec).await.unwrap();

    let observed = r.update(&spec, &baseline).await.unwrap();
    assert_eq!(observed.resource_version, baseline.resource_version);
}

#[tokio::test]
async fn test_update_retries_version_conflicts() {
    let r = reconciler(MODERN);
    let spec = full_spec("sa-conflict");
    let baseline = r.create(&spec).await.unwrap();

    let mut desired = spec.clone();
    desired.automount = Automount::Disabled;

    r.client().conflicts.store(2, Ordering::SeqCst);
    let updated = r.update(&desired, &baseline).await.unwrap();
    assert_eq!(updated.automount, Automount::Disabled);
}

#[tokio::test]
async fn test_update_surfaces_conflict_after_bounded_retries() {
    let r = reconciler(MODERN);
    let spec = full_spec("sa-hot");
    let baseline = r.create(&spec).await.unwrap();

    let mut desired = spec.clone();
    desired.automount = Automount::Disabled;

    r.client().conflicts.store(10, Ordering::SeqCst);
    let err = r.update(&desired, &baseline).await.unwrap_err();
    assert!(matches!(err, Error::Conflict { attempts: 3, .. }));
}

#[tokio::test]
async fn test_update_with_identity_change_recreates() {
    let r = reconciler(MODERN);
    let spec = full_spec("sa-old");
    let baseline = r.create(&spec).await.unwrap();
    let old_uid = baseline.uid.clone();

    let mut renamed = spec.clone();
    renamed.identity = Identity::named("ns1", "sa-new");
    renamed.secrets = names(&["sa-new-one"]);

    let recreated = r.update(&renamed, &baseline).await.unwrap();
    assert_eq!(recreated.name, "sa-new");
    assert_ne!(recreated.uid, old_uid);
    assert_eq!(recreated.all_secrets, names(&["sa-new-one"]));

    // The old identity is gone.
    assert!(r.read("ns1", "sa-old").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_confirms_absence() {
    let r = reconciler(MODERN);
    r.create(&full_spec("sa-del")).await.unwrap();

    r.delete("ns1", "sa-del").await.unwrap();
    assert!(r.read("ns1", "sa-del").await.unwrap().is_none());

    // Deleting again is the expected "already absent" success case.
    r.delete("ns1", "sa-del").await.unwrap();
}

#[tokio::test]
async fn test_delete_times_out_when_object_lingers() {
    let r = reconciler(MODERN);
    r.create(&full_spec("sa-stuck")).await.unwrap();

    r.client().stuck_deletes.store(true, Ordering::SeqCst);
    let err = r.delete("ns1", "sa-stuck").await.unwrap_err();
    assert!(matches!(err, Error::DeleteTimeout { .. }));
}

#[tokio::test]
async fn test_import_round_trip() {
    let r = reconciler(LEGACY);
    let spec = full_spec("sa-imp");
    r.create(&spec).await.unwrap();

    let (hydrated, observed) = r.import("ns1/sa-imp").await.unwrap();
    // The injected token secret is never imported as declared.
    assert_eq!(hydrated.secrets, spec.secrets);
    assert_eq!(hydrated.image_pull_secrets, spec.image_pull_secrets);
    assert_eq!(hydrated.identity, Identity::named("ns1", "sa-imp"));
    assert_eq!(observed.all_secrets.len(), 3);
}

#[tokio::test]
async fn test_import_rejects_malformed_identifier() {
    let r = reconciler(MODERN);
    let err = r.import("malformed").await.unwrap_err();
    assert!(matches!(err, Error::MalformedIdentifier(_)));
}

#[tokio::test]
async fn test_import_of_absent_object_is_not_found() {
    let r = reconciler(MODERN);
    let err = r.import("ns1/ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
