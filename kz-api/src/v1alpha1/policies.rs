use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Log,
    Enforce,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Log => write!(f, "log"),
            Mode::Enforce => write!(f, "enforce"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Mode::Log),
            "enforce" => Ok(Mode::Enforce),
            _ => Err(format!("unrecognized mode: {s}")),
        }
    }
}

// A ResourceRule selects the resources a policy applies to; `excluded` takes
// precedence over `resources`, and `resources` may contain the wildcard "*".
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub excluded: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    pub names: Option<Vec<String>>,
    pub selector: Option<metav1::LabelSelector>,
    pub excluded: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeOverride {
    pub api_groups: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
    pub namespaces: Option<Vec<String>>,
    pub mode: Mode,
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "kausality.io", version = "v1alpha1", kind = "Kausality")]
#[kube(shortname = "kz")]
#[kube(
    printcolumn = r#"{"name":"mode", "type":"string", "description":"default mode applied by this policy", "jsonPath":".spec.mode"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KausalitySpec {
    // Required fields
    pub resources: Vec<ResourceRule>,

    // Optional fields
    pub namespaces: Option<NamespaceSelector>,
    pub object_selector: Option<metav1::LabelSelector>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub overrides: Vec<ModeOverride>,
}
