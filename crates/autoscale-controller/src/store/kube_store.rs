use std::fmt::Debug;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::DeleteParams;
use kube::api::PostParams;
use kube::core::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::kind_of;
use super::ObjectKey;
use super::ObjectStore;
use super::StoreError;
use super::StoreResult;

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Maps an API failure onto the store taxonomy: 404 and 409 keep their meaning,
/// everything else is an opaque API error.
fn classify<K>(key: &ObjectKey, error: kube::Error) -> Report<StoreError>
where
    K: Resource<DynamicType = ()>,
{
    let kind = kind_of::<K>();
    let key = key.clone();
    let context = match &error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound { kind, key },
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict { kind, key },
        other => StoreError::Api {
            kind,
            key,
            message: other.to_string(),
        },
    };
    Report::new(error).change_context(context)
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        self.api::<K>(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| classify::<K>(key, e))
    }

    async fn create(&self, object: &K) -> StoreResult<K> {
        let key = ObjectKey::of(object);
        self.api::<K>(&key.namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(&key, e))
    }

    async fn replace(&self, object: &K) -> StoreResult<K> {
        let key = ObjectKey::of(object);
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(&key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| classify::<K>(key, e))
            .attach_printable_lazy(|| format!("deleting {}", kind_of::<K>()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
    use kube::core::ErrorResponse;
    use similar_asserts::assert_eq;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classify_maps_status_codes() {
        let key = ObjectKey::new("ns", "web");

        let not_found = classify::<HorizontalPodAutoscaler>(&key, api_error(404));
        let conflict = classify::<HorizontalPodAutoscaler>(&key, api_error(409));
        let other = classify::<HorizontalPodAutoscaler>(&key, api_error(500));

        assert!(matches!(
            not_found.current_context(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            conflict.current_context(),
            StoreError::Conflict { .. }
        ));
        assert!(matches!(other.current_context(), StoreError::Api { .. }));
        assert_eq!(
            not_found.current_context().to_string(),
            "HorizontalPodAutoscaler ns/web not found"
        );
    }
}
