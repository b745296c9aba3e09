use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::Resource;

use super::*;
use crate::errors::*;
use crate::prelude::*;

impl<T: Resource> KubeResourceExt for T {
    fn namespaced_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any().clone(),
        }
    }

    fn matches(&self, sel: &metav1::LabelSelector) -> anyhow::Result<bool> {
        selector_matches(self.labels(), sel)
    }
}

// The object's generation; the apiserver assigns 1 on create, so an unset
// generation (an object still in admission) counts as 1.
pub fn generation(obj: &DynamicObject) -> i64 {
    obj.metadata.generation.unwrap_or(1)
}

// status.observedGeneration as reported by the object's controller; 0 until
// the controller has observed anything.
pub fn observed_generation(obj: &DynamicObject) -> i64 {
    obj.data
        .pointer("/status/observedGeneration")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

pub fn is_converged(obj: &DynamicObject) -> bool {
    generation(obj) == observed_generation(obj)
}

pub fn is_deleting(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

pub fn api_version_and_kind(obj: &DynamicObject) -> (String, String) {
    match &obj.types {
        Some(t) => (t.api_version.clone(), t.kind.clone()),
        None => (String::new(), String::new()),
    }
}

// The meanings of these operators is explained here:
// https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/#set-based-requirement
pub(super) const OPERATOR_IN: &str = "In";
pub(super) const OPERATOR_NOT_IN: &str = "NotIn";
pub(super) const OPERATOR_EXISTS: &str = "Exists";
pub(super) const OPERATOR_DOES_NOT_EXIST: &str = "DoesNotExist";

// Label-selector evaluation against a plain label map; policies match both
// namespace labels and object labels through this.
pub fn selector_matches(labels: &BTreeMap<String, String>, sel: &metav1::LabelSelector) -> anyhow::Result<bool> {
    if let Some(exprs) = &sel.match_expressions {
        for expr in exprs {
            if !label_expr_match(labels, expr)? {
                return Ok(false);
            }
        }
    }

    if let Some(match_labels) = &sel.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn label_expr_match(
    obj_labels: &BTreeMap<String, String>,
    expr: &metav1::LabelSelectorRequirement,
) -> anyhow::Result<bool> {
    // LabelSelectorRequirement is considered invalid if the Operator is "In" or NotIn"
    // and there are no values; conversely for "Exists" and "DoesNotExist".
    match expr.operator.as_str() {
        OPERATOR_IN => match obj_labels.get(&expr.key) {
            Some(v) => match &expr.values {
                Some(values) if !values.is_empty() => Ok(values.contains(v)),
                _ => bail!(KubernetesError::malformed_label_selector(expr)),
            },
            None => Ok(false),
        },
        OPERATOR_NOT_IN => match obj_labels.get(&expr.key) {
            Some(v) => match &expr.values {
                Some(values) if !values.is_empty() => Ok(!values.contains(v)),
                _ => bail!(KubernetesError::malformed_label_selector(expr)),
            },
            None => Ok(true),
        },
        OPERATOR_EXISTS => match &expr.values {
            Some(values) if !values.is_empty() => bail!(KubernetesError::malformed_label_selector(expr)),
            _ => Ok(obj_labels.contains_key(&expr.key)),
        },
        OPERATOR_DOES_NOT_EXIST => match &expr.values {
            Some(values) if !values.is_empty() => {
                bail!(KubernetesError::malformed_label_selector(expr));
            },
            _ => Ok(!obj_labels.contains_key(&expr.key)),
        },
        _ => bail!("malformed label selector expression: {:?}", expr),
    }
}
