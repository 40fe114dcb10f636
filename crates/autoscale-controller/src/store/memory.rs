//! In-memory [`ObjectStore`] used by the reconciler tests.
//!
//! Objects are kept as JSON so one store can hold every resource type. Each
//! successful write is recorded, failures can be injected per kind and verb, and
//! `replace` enforces `resourceVersion` like the API server does.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use error_stack::Report;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::kind_of;
use super::ObjectKey;
use super::ObjectStore;
use super::StoreError;
use super::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Replace,
    Delete,
}

/// A write that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

#[derive(Debug, Clone, Copy)]
enum Injected {
    Api,
    Conflict,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ObjectKey), Value>,
    writes: Vec<RecordedWrite>,
    failures: Vec<(String, Verb, Injected)>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_failure(&mut self, kind: &str, verb: Verb, key: &ObjectKey) -> StoreResult<()> {
        let Some(index) = self
            .failures
            .iter()
            .position(|(k, v, _)| k == kind && *v == verb)
        else {
            return Ok(());
        };
        let (kind, verb, injected) = self.failures.remove(index);
        let key = key.clone();
        Err(Report::new(match injected {
            Injected::Conflict => StoreError::Conflict { kind, key },
            Injected::Api => StoreError::Api {
                kind,
                key,
                message: format!("injected {verb:?} failure"),
            },
        }))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store poisoned")
    }

    /// Seeds an object without recording a write. Returns the stored copy.
    pub fn insert<K>(&self, mut object: K) -> K
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut state = self.state();
        let version = state.next_version();
        let meta = object.meta_mut();
        meta.resource_version = Some(version.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        let key = ObjectKey::of(&object);
        state.objects.insert(
            (kind_of::<K>(), key),
            serde_json::to_value(&object).expect("serializable object"),
        );
        object
    }

    pub fn fetch<K>(&self, key: &ObjectKey) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.state()
            .objects
            .get(&(kind_of::<K>(), key.clone()))
            .map(|value| serde_json::from_value(value.clone()).expect("stored object decodes"))
    }

    /// Makes the next `verb` call for kind `K` fail with an API error.
    pub fn fail_next<K>(&self, verb: Verb)
    where
        K: Resource<DynamicType = ()>,
    {
        self.state()
            .failures
            .push((kind_of::<K>(), verb, Injected::Api));
    }

    /// Makes the next `verb` call for kind `K` fail with a conflict.
    pub fn conflict_next<K>(&self, verb: Verb)
    where
        K: Resource<DynamicType = ()>,
    {
        self.state()
            .failures
            .push((kind_of::<K>(), verb, Injected::Conflict));
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    pub fn writes_of<K>(&self) -> Vec<Verb>
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = kind_of::<K>();
        self.state()
            .writes
            .iter()
            .filter(|write| write.kind == kind)
            .map(|write| write.verb)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        let kind = kind_of::<K>();
        let mut state = self.state();
        state.take_failure(&kind, Verb::Get, key)?;
        Ok(state
            .objects
            .get(&(kind, key.clone()))
            .map(|value| serde_json::from_value(value.clone()).expect("stored object decodes")))
    }

    async fn create(&self, object: &K) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(object);
        let mut state = self.state();
        state.take_failure(&kind, Verb::Create, &key)?;
        if state.objects.contains_key(&(kind.clone(), key.clone())) {
            return Err(Report::new(StoreError::Conflict { kind, key }));
        }

        let mut created = object.clone();
        let version = state.next_version();
        let meta = created.meta_mut();
        meta.resource_version = Some(version.clone());
        meta.uid = Some(format!("uid-{version}"));
        state.objects.insert(
            (kind.clone(), key.clone()),
            serde_json::to_value(&created).expect("serializable object"),
        );
        state.writes.push(RecordedWrite {
            verb: Verb::Create,
            kind,
            key,
        });
        Ok(created)
    }

    async fn replace(&self, object: &K) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(object);
        let mut state = self.state();
        state.take_failure(&kind, Verb::Replace, &key)?;
        let Some(stored) = state.objects.get(&(kind.clone(), key.clone())) else {
            return Err(Report::new(StoreError::NotFound { kind, key }));
        };
        let stored_version = stored
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if let Some(version) = &object.meta().resource_version {
            if stored_version.as_deref() != Some(version.as_str()) {
                return Err(Report::new(StoreError::Conflict { kind, key }));
            }
        }

        let mut replaced = object.clone();
        let version = state.next_version();
        replaced.meta_mut().resource_version = Some(version);
        let released = replaced.meta().deletion_timestamp.is_some()
            && replaced
                .meta()
                .finalizers
                .as_ref()
                .map_or(true, |finalizers| finalizers.is_empty());
        if released {
            state.objects.remove(&(kind.clone(), key.clone()));
        } else {
            state.objects.insert(
                (kind.clone(), key.clone()),
                serde_json::to_value(&replaced).expect("serializable object"),
            );
        }
        state.writes.push(RecordedWrite {
            verb: Verb::Replace,
            kind,
            key,
        });
        Ok(replaced)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let kind = kind_of::<K>();
        let mut state = self.state();
        state.take_failure(&kind, Verb::Delete, key)?;
        if state.objects.remove(&(kind.clone(), key.clone())).is_none() {
            return Err(Report::new(StoreError::NotFound {
                kind,
                key: key.clone(),
            }));
        }
        state.writes.push(RecordedWrite {
            verb: Verb::Delete,
            kind,
            key: key.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::ObjectMeta;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::store::delete_if_present;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test(tokio::test)]
    async fn stale_replace_conflicts() {
        let store = MemoryStore::new();
        let stored = store.insert(deployment("web"));

        let fresh = ObjectStore::<Deployment>::replace(&store, &stored).await;
        let stale = ObjectStore::<Deployment>::replace(&store, &stored).await;

        assert!(fresh.is_ok());
        assert!(matches!(
            stale.map_err(|r| r.current_context().to_string()),
            Err(message) if message == "conflicting write to Deployment ns/web"
        ));
    }

    #[test(tokio::test)]
    async fn injected_failure_fires_once() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("ns", "web");
        store.insert(deployment("web"));
        store.fail_next::<Deployment>(Verb::Get);

        let first = ObjectStore::<Deployment>::get(&store, &key).await;
        let second = ObjectStore::<Deployment>::get(&store, &key).await;

        assert!(first.is_err());
        assert!(matches!(second, Ok(Some(_))));
    }

    #[test(tokio::test)]
    async fn delete_if_present_tolerates_missing() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("ns", "web");
        store.insert(deployment("web"));

        let first = delete_if_present::<Deployment, _>(&store, &key).await;
        let second = delete_if_present::<Deployment, _>(&store, &key).await;

        assert_eq!(first.ok(), Some(true));
        assert_eq!(second.ok(), Some(false));
        assert_eq!(store.writes_of::<Deployment>(), vec![Verb::Delete]);
    }
}
