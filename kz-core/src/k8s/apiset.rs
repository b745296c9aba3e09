use std::collections::HashMap;
use std::collections::hash_map::Entry;

use kube::api::{
    ApiResource,
    DynamicObject,
};
use kube::discovery::{
    ApiCapabilities,
    Scope,
};

use crate::k8s::GVK;

// Caches discovery results so repeated parent lookups for the same GVK don't
// hammer the apiserver's discovery endpoints.  Api handles themselves are
// cheap to construct and aren't cached.
pub struct DynamicApiSet {
    client: kube::Client,
    resources: HashMap<GVK, (ApiResource, ApiCapabilities)>,
}

impl DynamicApiSet {
    pub fn new(client: kube::Client) -> DynamicApiSet {
        DynamicApiSet { client, resources: HashMap::new() }
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    // Returns an Api scoped to `namespace` when the resource is namespaced,
    // and a cluster-wide Api otherwise.
    pub async fn api_for(&mut self, gvk: &GVK, namespace: Option<&str>) -> anyhow::Result<kube::Api<DynamicObject>> {
        let (ar, cap) = self.api_meta_for(gvk).await?;
        let api = match (&cap.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => kube::Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => kube::Api::all_with(self.client.clone(), &ar),
        };
        Ok(api)
    }

    async fn api_meta_for(&mut self, gvk: &GVK) -> anyhow::Result<(ApiResource, ApiCapabilities)> {
        match self.resources.entry(gvk.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let api_meta = kube::discovery::pinned_kind(&self.client, e.key()).await?;
                Ok(e.insert(api_meta).clone())
            },
        }
    }
}
