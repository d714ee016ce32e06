//! Typed seam over the orchestration API.
//!
//! The reconciler takes an [`AccountClient`] as an explicit constructor
//! dependency — no global provider state. Production code uses
//! [`KubeAccounts`] over a `kube::Client`; tests substitute an in-memory
//! fake. Errors cross this seam as raw `kube::Error` values and are
//! classified into the crate taxonomy by the caller, which knows the object
//! identity.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

#[async_trait]
pub trait AccountClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<ServiceAccount, kube::Error>;

    async fn create(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;

    /// Full replace guarded by the `resourceVersion` carried on `account`;
    /// the server answers 409 when it is stale.
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// [`AccountClient`] backed by a shared `kube::Client`. The client is cheap
/// to clone; a namespaced `Api` handle is built per call.
#[derive(Clone)]
pub struct KubeAccounts {
    client: Client,
}

impl KubeAccounts {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AccountClient for KubeAccounts {
    async fn get(&self, namespace: &str, name: &str) -> Result<ServiceAccount, kube::Error> {
        self.api(namespace).get(name).await
    }

    async fn create(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.api(namespace)
            .create(&PostParams::default(), account)
            .await
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.api(namespace)
            .replace(name, &PostParams::default(), account)
            .await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}
