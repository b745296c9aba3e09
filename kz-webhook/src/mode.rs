use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::{
    DynamicObject,
    ListParams,
};
use kube::core::GroupVersionResource;
use kz_api::v1alpha1::{
    KausalitySpec,
    ModeOverride,
    NamespaceSelector,
    ResourceRule,
};
use kz_core::annotations;
use kz_core::k8s::selector_matches;
use kz_core::metrics::POLICY_RESOLUTION_FAILURES;
use kz_core::prelude::*;
use metrics::counter;
use tracing::*;

// Specificity weights; a policy that names namespaces outright beats one
// that selects them by label, which beats a resource-only policy.
const SCORE_NAMESPACE_NAMES: i64 = 100;
const SCORE_NAMESPACE_SELECTOR: i64 = 50;
const SCORE_EXPLICIT_RESOURCE: i64 = 10;
const SCORE_OBJECT_SELECTOR: i64 = 5;

#[async_trait]
pub trait ModeResolver: Send + Sync {
    // None means "nothing tracks this object": no policy matches it and
    // neither the object nor its namespace carries a mode annotation.
    fn resolve(
        &self,
        gvr: &GroupVersionResource,
        obj: &DynamicObject,
        namespace: Option<&corev1::Namespace>,
    ) -> Option<Mode>;

    async fn refresh(&self) -> EmptyResult;
}

fn annotation_mode(obj: &DynamicObject, namespace: Option<&corev1::Namespace>) -> Option<Mode> {
    if let Some(mode) = annotations::get_mode(obj.annotations()) {
        return Some(mode);
    }
    namespace.and_then(|ns| annotations::get_mode(ns.annotations()))
}

// Holds the cached policy list; resolution walks every policy and picks the
// most specific match.
pub struct PolicyResolver {
    client: kube::Client,
    policies: RwLock<Vec<Kausality>>,
}

impl PolicyResolver {
    pub fn new(client: kube::Client) -> PolicyResolver {
        PolicyResolver { client, policies: RwLock::new(vec![]) }
    }

    // Direct injection for tests and embedded control planes
    pub fn update(&self, mut policies: Vec<Kausality>) {
        policies.sort_by_key(|p| p.name_any());
        *self.policies.write().unwrap() = policies;
    }

    fn resolve_policy_mode(
        &self,
        gvr: &GroupVersionResource,
        obj: &DynamicObject,
        namespace: Option<&corev1::Namespace>,
    ) -> Option<Mode> {
        let ns_name = obj.namespace();
        let empty_labels = BTreeMap::new();
        let ns_labels = namespace.map_or(&empty_labels, |ns| ns.labels());

        let policies = self.policies.read().unwrap();
        let mut best: Option<(&Kausality, i64)> = None;
        for policy in policies.iter() {
            match policy_matches(&policy.spec, gvr, ns_name.as_deref(), ns_labels, obj) {
                Ok(false) => continue,
                Ok(true) => (),
                Err(err) => {
                    counter!(POLICY_RESOLUTION_FAILURES).increment(1);
                    warn!("policy {} failed to evaluate, skipping: {err}", policy.name_any());
                    continue;
                },
            }

            let score = specificity(&policy.spec, gvr);
            // the list is sorted by name, so a strict comparison keeps the
            // first (lowest) name on ties
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((policy, score));
            }
        }

        let (policy, _) = best?;
        Some(resolve_overrides(&policy.spec, gvr, ns_name.as_deref()))
    }
}

#[async_trait]
impl ModeResolver for PolicyResolver {
    fn resolve(
        &self,
        gvr: &GroupVersionResource,
        obj: &DynamicObject,
        namespace: Option<&corev1::Namespace>,
    ) -> Option<Mode> {
        annotation_mode(obj, namespace).or_else(|| self.resolve_policy_mode(gvr, obj, namespace))
    }

    async fn refresh(&self) -> EmptyResult {
        let api = kube::Api::<Kausality>::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        let policies = list
            .items
            .into_iter()
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .collect::<Vec<_>>();
        debug!("refreshed {} kausality policies", policies.len());

        // the lock is only taken once the list call has completed
        self.update(policies);
        Ok(())
    }
}

// Tracks everything at a fixed mode; annotations still take precedence.
// Mostly useful for embedded control planes where a policy CRD is overkill.
pub struct StaticResolver {
    mode: Mode,
}

impl StaticResolver {
    pub fn new(mode: Mode) -> StaticResolver {
        StaticResolver { mode }
    }
}

#[async_trait]
impl ModeResolver for StaticResolver {
    fn resolve(
        &self,
        _gvr: &GroupVersionResource,
        obj: &DynamicObject,
        namespace: Option<&corev1::Namespace>,
    ) -> Option<Mode> {
        Some(annotation_mode(obj, namespace).unwrap_or(self.mode))
    }

    async fn refresh(&self) -> EmptyResult {
        Ok(())
    }
}

fn rule_matches(rule: &ResourceRule, gvr: &GroupVersionResource) -> bool {
    if !rule.api_groups.iter().any(|g| g == &gvr.group) {
        return false;
    }
    if rule.excluded.as_ref().is_some_and(|ex| ex.contains(&gvr.resource)) {
        return false;
    }
    rule.resources.iter().any(|r| r == MATCH_ANY || r == &gvr.resource)
}

fn namespace_selector_matches(
    sel: &NamespaceSelector,
    ns_name: Option<&str>,
    ns_labels: &BTreeMap<String, String>,
) -> anyhow::Result<bool> {
    let ns_name = ns_name.unwrap_or_default();
    if sel.excluded.as_ref().is_some_and(|ex| ex.iter().any(|n| n == ns_name)) {
        return Ok(false);
    }
    if let Some(names) = &sel.names {
        return Ok(names.iter().any(|n| n == ns_name));
    }
    if let Some(selector) = &sel.selector {
        return selector_matches(ns_labels, selector);
    }
    Ok(true)
}

fn policy_matches(
    spec: &KausalitySpec,
    gvr: &GroupVersionResource,
    ns_name: Option<&str>,
    ns_labels: &BTreeMap<String, String>,
    obj: &DynamicObject,
) -> anyhow::Result<bool> {
    if !spec.resources.iter().any(|rule| rule_matches(rule, gvr)) {
        return Ok(false);
    }
    if let Some(sel) = &spec.namespaces {
        if !namespace_selector_matches(sel, ns_name, ns_labels)? {
            return Ok(false);
        }
    }
    if let Some(sel) = &spec.object_selector {
        if !selector_matches(obj.labels(), sel)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn specificity(spec: &KausalitySpec, gvr: &GroupVersionResource) -> i64 {
    let mut score = 0;
    if let Some(sel) = &spec.namespaces {
        if sel.names.is_some() {
            score += SCORE_NAMESPACE_NAMES;
        }
        if sel.selector.is_some() {
            score += SCORE_NAMESPACE_SELECTOR;
        }
    }
    if spec.resources.iter().any(|r| r.resources.iter().any(|res| res == &gvr.resource)) {
        score += SCORE_EXPLICIT_RESOURCE;
    }
    if spec.object_selector.is_some() {
        score += SCORE_OBJECT_SELECTOR;
    }
    score
}

fn override_matches(ov: &ModeOverride, gvr: &GroupVersionResource, ns_name: Option<&str>) -> bool {
    if ov.api_groups.as_ref().is_some_and(|groups| !groups.contains(&gvr.group)) {
        return false;
    }
    if ov
        .resources
        .as_ref()
        .is_some_and(|resources| !resources.iter().any(|r| r == MATCH_ANY || r == &gvr.resource))
    {
        return false;
    }
    if let Some(namespaces) = &ov.namespaces {
        let ns_name = ns_name.unwrap_or_default();
        if !namespaces.iter().any(|n| n == ns_name) {
            return false;
        }
    }
    true
}

fn resolve_overrides(spec: &KausalitySpec, gvr: &GroupVersionResource, ns_name: Option<&str>) -> Mode {
    spec.overrides
        .iter()
        .find(|ov| override_matches(ov, gvr, ns_name))
        .map_or(spec.mode, |ov| ov.mode)
}
