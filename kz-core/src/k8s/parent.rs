use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use tokio::sync::Mutex;
use tokio::time::{
    sleep,
    timeout,
};
use tracing::*;

use super::*;
use crate::errors::*;
use crate::prelude::*;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct Parent {
    pub gvk: GVK,
    pub object: DynamicObject,
}

// Resolves the direct parent of an object through its owner references.
// Deliberately one hop only: the trace chain carries transitive causality, so
// chasing the full owner chain here would be redundant (and cycles can't form
// over a single hop).
pub struct ParentResolver {
    apiset: Arc<Mutex<DynamicApiSet>>,
    fetch_timeout: Duration,
}

impl ParentResolver {
    pub fn new(apiset: DynamicApiSet) -> ParentResolver {
        ParentResolver::with_shared(Arc::new(Mutex::new(apiset)))
    }

    pub fn with_shared(apiset: Arc<Mutex<DynamicApiSet>>) -> ParentResolver {
        ParentResolver {
            apiset,
            fetch_timeout: Duration::from_secs(PARENT_FETCH_TIMEOUT_SECONDS),
        }
    }

    // The first owner reference whose GVK the apiserver recognizes and whose
    // referent exists wins.  Not-found owners yield no parent; transport
    // errors propagate to the caller (which fails open).
    pub async fn resolve(&self, obj: &DynamicObject) -> anyhow::Result<Option<Parent>> {
        let ns = obj.namespace();
        for rf in obj.owner_references() {
            let gvk = match GVK::from_owner_ref(rf) {
                Ok(gvk) => gvk,
                Err(err) => {
                    warn!("skipping malformed owner reference {rf:?}: {err}");
                    continue;
                },
            };

            let maybe_api = {
                let mut apiset = self.apiset.lock().await;
                apiset.api_for(&gvk, ns.as_deref()).await
            };
            let api = match maybe_api {
                Ok(api) => api,
                Err(err) => {
                    debug!("owner type {gvk} not recognized by the apiserver: {err}");
                    continue;
                },
            };

            if let Some(object) = self.fetch(&api, &rf.name).await? {
                debug!("resolved parent {gvk}.{}", object.namespaced_name());
                return Ok(Some(Parent { gvk, object }));
            }
        }

        Ok(None)
    }

    // One retry inside the fetch timeout; anything that still fails
    // afterwards is the caller's problem.
    async fn fetch(
        &self,
        api: &kube::Api<DynamicObject>,
        name: &str,
    ) -> anyhow::Result<Option<DynamicObject>> {
        let attempt = timeout(self.fetch_timeout, async {
            match api.get_opt(name).await {
                Ok(maybe_obj) => Ok(maybe_obj),
                Err(err) => {
                    warn!("parent fetch for {name} failed, retrying: {err}");
                    sleep(RETRY_BACKOFF).await;
                    api.get_opt(name).await.map_err(|e| e.into())
                },
            }
        })
        .await;

        match attempt {
            Ok(res) => res,
            Err(_) => bail!("parent fetch for {name} timed out after {:?}", self.fetch_timeout),
        }
    }
}
