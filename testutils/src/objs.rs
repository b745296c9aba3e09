use kube::api::{
    ApiResource,
    DynamicObject,
};
use kz_core::k8s::GVK;
use rstest::fixture;
use serde_json::json;

use crate::constants::*;

pub fn depl_gvk() -> GVK {
    GVK::new("apps", "v1", "Deployment")
}

pub fn rs_gvk() -> GVK {
    GVK::new("apps", "v1", "ReplicaSet")
}

// A converged parent: generation == status.observedGeneration
#[fixture]
pub fn test_deployment(#[default(TEST_DEPLOYMENT)] name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(&depl_gvk()))
        .within(TEST_NAMESPACE)
        .data(json!({"spec": {"replicas": 42}, "status": {"observedGeneration": 5}}));
    obj.metadata.generation = Some(5);
    obj.metadata.uid = Some("depl-uid-1234".into());
    obj
}

#[fixture]
pub fn test_replicaset(#[default(TEST_REPLICASET)] name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(&rs_gvk()))
        .within(TEST_NAMESPACE)
        .data(json!({"spec": {"replicas": 42}, "status": {"observedGeneration": 2}}));
    obj.metadata.generation = Some(2);
    obj.metadata.uid = Some("rs-uid-5678".into());
    obj
}

pub fn with_generations(mut obj: DynamicObject, generation: i64, observed_generation: i64) -> DynamicObject {
    obj.metadata.generation = Some(generation);
    obj.data["status"]["observedGeneration"] = json!(observed_generation);
    obj
}

pub fn with_annotation(mut obj: DynamicObject, key: &str, value: &str) -> DynamicObject {
    obj.metadata
        .annotations
        .get_or_insert_default()
        .insert(key.into(), value.into());
    obj
}

pub fn with_owner(mut obj: DynamicObject, owner: &DynamicObject) -> DynamicObject {
    let types = owner.types.clone().unwrap_or_default();
    obj.metadata
        .owner_references
        .get_or_insert_default()
        .push(k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            api_version: types.api_version,
            kind: types.kind,
            name: owner.metadata.name.clone().unwrap_or_default(),
            uid: owner.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            ..Default::default()
        });
    obj
}
