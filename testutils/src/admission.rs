use kube::api::DynamicObject;
use kube::core::admission::{
    AdmissionRequest,
    AdmissionReview,
};
use serde_json::json;

use crate::constants::*;

// Builds a decoded AdmissionRequest the way the apiserver would deliver it;
// going through the AdmissionReview JSON keeps the fixtures honest about the
// wire format (fieldManager rides in the operation options, for example).
pub struct AdmissionRequestBuilder {
    operation: String,
    user: String,
    field_manager: Option<String>,
    subresource: Option<String>,
    old_object: Option<DynamicObject>,
    new_object: Option<DynamicObject>,
    dry_run: bool,
}

impl AdmissionRequestBuilder {
    pub fn update(obj: &DynamicObject) -> AdmissionRequestBuilder {
        AdmissionRequestBuilder {
            operation: "UPDATE".into(),
            user: TEST_USER.into(),
            field_manager: None,
            subresource: None,
            old_object: Some(obj.clone()),
            new_object: Some(obj.clone()),
            dry_run: false,
        }
    }

    pub fn create(obj: &DynamicObject) -> AdmissionRequestBuilder {
        AdmissionRequestBuilder {
            operation: "CREATE".into(),
            user: TEST_USER.into(),
            field_manager: None,
            subresource: None,
            old_object: None,
            new_object: Some(obj.clone()),
            dry_run: false,
        }
    }

    pub fn delete(obj: &DynamicObject) -> AdmissionRequestBuilder {
        AdmissionRequestBuilder {
            operation: "DELETE".into(),
            user: TEST_USER.into(),
            field_manager: None,
            subresource: None,
            old_object: Some(obj.clone()),
            new_object: None,
            dry_run: false,
        }
    }

    pub fn by(mut self, user: &str) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_field_manager(mut self, field_manager: &str) -> Self {
        self.field_manager = Some(field_manager.into());
        self
    }

    pub fn with_subresource(mut self, subresource: &str) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    pub fn with_new_object(mut self, obj: &DynamicObject) -> Self {
        self.new_object = Some(obj.clone());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn build(self) -> AdmissionRequest<DynamicObject> {
        let obj = self.new_object.as_ref().or(self.old_object.as_ref()).expect("no object");
        let types = obj.types.clone().unwrap_or_default();
        let (group, version) = match types.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        let resource = format!("{}s", types.kind.to_lowercase());

        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": TEST_REQUEST_UID,
                "kind": {"group": group, "version": version, "kind": types.kind},
                "resource": {"group": group, "version": version, "resource": resource},
                "subResource": self.subresource,
                "name": obj.metadata.name.clone().unwrap_or_default(),
                "namespace": obj.metadata.namespace,
                "operation": self.operation,
                "userInfo": {"username": self.user, "uid": "user-uid", "groups": ["system:authenticated"]},
                "object": self.new_object,
                "oldObject": self.old_object,
                "dryRun": self.dry_run,
                "options": self.field_manager.map(|fm| json!({
                    "apiVersion": "meta.k8s.io/v1",
                    "kind": "UpdateOptions",
                    "fieldManager": fm,
                })),
            }
        }))
        .expect("could not build AdmissionReview");

        review.try_into().expect("AdmissionReview had no request")
    }
}
