use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

pub const DRIFT_REPORT_API_VERSION: &str = "kausality.io/v1alpha1";
pub const DRIFT_REPORT_KIND: &str = "DriftReport";

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum DriftPhase {
    Detected,
    Resolved,
}

// Identifies one side of a parent/child relationship at the time a drift was
// observed.  `generation` is absent for objects the apiserver has not yet
// assigned one to.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub user: String,
    pub uid: String,
    pub operation: String,
    pub field_manager: Option<String>,
    pub subresource: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReportSpec {
    pub id: String,
    pub phase: DriftPhase,
    pub parent: ObjectIdentity,
    pub child: ObjectIdentity,
    pub request: RequestSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_object: Option<Value>,
}

// The wire form POSTed to report sinks; not a CRD, so the type metadata is
// carried inline.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub api_version: String,
    pub kind: String,
    pub spec: DriftReportSpec,
}

impl DriftReport {
    pub fn new(spec: DriftReportSpec) -> DriftReport {
        DriftReport {
            api_version: DRIFT_REPORT_API_VERSION.into(),
            kind: DRIFT_REPORT_KIND.into(),
            spec,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn phase(&self) -> DriftPhase {
        self.spec.phase
    }
}
