//! Lifecycle reconciler for ServiceAccount objects.
//!
//! Drives create/read/update/delete/import against the cluster through an
//! injected [`AccountClient`], using the diff engine for update planning and
//! the secret-set matcher to keep platform-injected secrets out of drift
//! detection and to verify imports.
//!
//! Every operation is a plain `async fn` executed on the caller's task:
//! caller-side timeouts and cancellation propagate into the in-flight HTTP
//! call. A cancelled operation leaves the remote object in whatever state
//! the server last committed; the next invocation re-reads instead of
//! assuming an outcome.

use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::ServiceAccount;
use tracing::{debug, info, instrument, warn};

use crate::backoff::calculate_backoff;
use crate::capabilities::Capabilities;
use crate::client::AccountClient;
use crate::diff::{diff, DiffOutcome};
use crate::error::{Error, Result};
use crate::import::{hydrate_spec, parse_identifier};
use crate::model::{AccountSpec, ObservedAccount};
use crate::secrets;

/// Bounds for local retries and confirmation polling.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts per operation for transient and version-conflict retries.
    pub max_attempts: u32,
    /// Backoff bounds for transient retries.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// How long to poll for confirmed absence after a delete.
    pub delete_timeout: Duration,
    /// How long to wait for the platform to inject the token secret after
    /// create, on clusters that still do that.
    pub token_wait: Duration,
    /// Confirmation poll interval.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            delete_timeout: Duration::from_secs(60),
            token_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// The reconciler. One value per API session; holds no per-object state, so
/// distinct objects may be reconciled concurrently through clones or shared
/// references.
pub struct AccountReconciler<C> {
    client: C,
    caps: Capabilities,
    policy: RetryPolicy,
}

impl<C: AccountClient> AccountReconciler<C> {
    pub fn new(client: C, caps: Capabilities) -> Self {
        Self {
            client,
            caps,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(client: C, caps: Capabilities, policy: RetryPolicy) -> Self {
        Self {
            client,
            caps,
            policy,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Submit the desired object and confirm it with a fresh read.
    ///
    /// Transient transport failures are retried with bounded backoff. A 409
    /// is a duplicate identity and fails immediately as a validation error.
    /// On clusters that auto-provision token secrets, the confirming read
    /// waits (bounded) for the injected token secret to appear.
    #[instrument(skip(self, desired), fields(id = %desired.identity))]
    pub async fn create(&self, desired: &AccountSpec) -> Result<ObservedAccount> {
        let id = desired.identity.to_string();
        let wire = desired.to_service_account();

        let created = self
            .with_transient_retry(&id, || {
                self.client.create(&desired.identity.namespace, &wire)
            })
            .await?;
        let created = ObservedAccount::from_service_account(&created)?;

        if !desired.identity.accepts_name(&created.name) {
            return Err(Error::Validation {
                id,
                message: format!(
                    "server assigned name {:?}, which does not satisfy the declared identity",
                    created.name
                ),
            });
        }

        info!(name = %created.name, "service account created");
        self.confirm_create(&desired.identity.namespace, &created.name)
            .await
    }

    /// Fetch by identity. Absence is a state, not an error: 404 maps to
    /// `Ok(None)` so existence checks can detect out-of-band deletion.
    #[instrument(skip(self))]
    pub async fn read(&self, namespace: &str, name: &str) -> Result<Option<ObservedAccount>> {
        let id = format!("{namespace}/{name}");
        let fetched = self
            .with_transient_retry(&id, || self.client.get(namespace, name))
            .await;
        match fetched {
            Ok(sa) => Ok(Some(ObservedAccount::from_service_account(&sa)?)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Converge the live object onto `desired`, starting from the driver's
    /// last known baseline identity.
    ///
    /// Runs read → diff → replace under optimistic concurrency; a stale
    /// `resourceVersion` triggers a fresh read-diff-replace cycle, bounded
    /// by the retry policy. An identity change destroys and recreates.
    #[instrument(skip(self, desired, baseline), fields(id = %baseline.identifier()))]
    pub async fn update(
        &self,
        desired: &AccountSpec,
        baseline: &ObservedAccount,
    ) -> Result<ObservedAccount> {
        let namespace = baseline.namespace.as_str();
        let name = baseline.name.as_str();
        let id = baseline.identifier();

        let mut attempt = 0u32;
        loop {
            let wire = self
                .with_transient_retry(&id, || self.client.get(namespace, name))
                .await?;
            let observed = ObservedAccount::from_service_account(&wire)?;

            let ops = match diff(desired, &observed) {
                DiffOutcome::Unchanged => {
                    debug!("no drift; nothing to update");
                    return Ok(observed);
                }
                DiffOutcome::Recreate => {
                    info!("identity changed; destroying and recreating");
                    self.delete(namespace, name).await?;
                    return self.create(desired).await;
                }
                DiffOutcome::Update(ops) => ops,
            };

            let fields: Vec<&str> = ops.iter().map(|op| op.field()).collect();
            debug!(?fields, "applying field updates");

            let mut replacement: ServiceAccount = wire;
            for op in &ops {
                op.apply_to(&mut replacement);
            }

            match self.client.replace(namespace, name, &replacement).await {
                Ok(updated) => {
                    info!(?fields, "service account updated");
                    return ObservedAccount::from_service_account(&updated);
                }
                Err(e) => match Error::from_kube(e, &id) {
                    Error::Conflict { .. } => {
                        attempt += 1;
                        if attempt >= self.policy.max_attempts {
                            return Err(Error::Conflict {
                                id,
                                attempts: attempt,
                            });
                        }
                        warn!(attempt, "stale resourceVersion; re-reading and retrying");
                    }
                    Error::Transient { message, .. } => {
                        attempt += 1;
                        if attempt >= self.policy.max_attempts {
                            return Err(Error::Transient { id, message });
                        }
                        let delay = self.backoff(attempt - 1);
                        warn!(attempt, %message, ?delay, "transient error; backing off");
                        tokio::time::sleep(delay).await;
                    }
                    fatal => return Err(fatal),
                },
            }
        }
    }

    /// Delete by identity and poll until absence is confirmed.
    ///
    /// A 404 on the delete itself means the object was already gone, which
    /// is the expected success shape of a destroy check. Failing to confirm
    /// absence within the bound is fatal: the object is left in an ambiguous
    /// state for operator intervention.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let id = format!("{namespace}/{name}");
        let deleted = self
            .with_transient_retry(&id, || self.client.delete(namespace, name))
            .await;
        match deleted {
            Ok(()) => {}
            Err(Error::NotFound { .. }) => {
                debug!("already absent");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let started = Instant::now();
        loop {
            if self.read(namespace, name).await?.is_none() {
                info!("deletion confirmed");
                return Ok(());
            }
            if started.elapsed() >= self.policy.delete_timeout {
                return Err(Error::DeleteTimeout {
                    id,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!("still present; polling for deletion");
            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    /// Import an existing object by `<namespace>/<name>` identifier.
    ///
    /// Reads the live object, verifies its secret set against what the
    /// hydrated declaration implies (verification failures are reported,
    /// not retried), and returns the round-trip-verified declaration for
    /// the driver to persist as new desired state.
    #[instrument(skip(self))]
    pub async fn import(&self, identifier: &str) -> Result<(AccountSpec, ObservedAccount)> {
        let (namespace, name) = parse_identifier(identifier)?;
        let observed = self
            .read(&namespace, &name)
            .await?
            .ok_or_else(|| Error::NotFound {
                id: format!("{namespace}/{name}"),
            })?;

        let spec = hydrate_spec(&observed);
        let expected = secrets::expectations_for(&spec.secrets, &name);
        secrets::verify(&observed.all_secrets, &expected, &name, self.caps)?;

        info!(
            secrets = spec.secrets.len(),
            image_pull_secrets = spec.image_pull_secrets.len(),
            "service account imported"
        );
        Ok((spec, observed))
    }

    /// Confirming read after create. On auto-provisioning clusters this
    /// waits (bounded) for the injected token secret so the read-back
    /// carries the complete secret set.
    async fn confirm_create(&self, namespace: &str, name: &str) -> Result<ObservedAccount> {
        let id = format!("{namespace}/{name}");
        let started = Instant::now();
        loop {
            let observed = self
                .read(namespace, name)
                .await?
                .ok_or_else(|| Error::NotFound { id: id.clone() })?;

            if !self.caps.auto_token_secret {
                return Ok(observed);
            }
            if let Some(token) = observed.default_token_secret() {
                debug!(token, "token secret provisioned");
                return Ok(observed);
            }
            if started.elapsed() >= self.policy.token_wait {
                return Err(Error::SecretMatch {
                    id,
                    message: "platform did not provision a token secret in time".to_string(),
                });
            }
            debug!("waiting for the platform token secret");
            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            Some(self.policy.base_delay.as_millis() as u64),
            Some(self.policy.max_delay.as_millis() as u64),
        )
    }

    /// Run a remote call, retrying transient failures with bounded backoff.
    /// All other errors are classified and returned as-is.
    async fn with_transient_retry<T, F, Fut>(&self, id: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, kube::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => match Error::from_kube(e, id) {
                    Error::Transient { message, .. } => {
                        attempt += 1;
                        if attempt >= self.policy.max_attempts {
                            return Err(Error::Transient {
                                id: id.to_string(),
                                message,
                            });
                        }
                        let delay = self.backoff(attempt - 1);
                        warn!(attempt, %message, ?delay, "transient error; backing off");
                        tokio::time::sleep(delay).await;
                    }
                    other => return Err(other),
                },
            }
        }
    }
}
