use json_patch::jsonptr::PointerBuf;
use json_patch::{
    AddOperation,
    Patch,
    PatchOperation,
};
use kube::api::{
    DynamicObject,
    PatchParams,
};
use kube::core::admission::{
    AdmissionRequest,
    AdmissionResponse,
    Operation,
};
use kz_api::v1alpha1::{
    DriftPhase,
    DriftReport,
    DriftReportSpec,
    ObjectIdentity,
    RequestSummary,
};
use kz_core::annotations::{
    self,
    Approval,
    ApprovalMode,
    ChildRef,
    Phase,
};
use kz_core::jsonutils;
use kz_core::k8s::{
    self,
    Parent,
};
use kz_core::metrics::DRIFT_DETECTED;
use kz_core::prelude::*;
use kz_core::trace::{
    extract_metadata_labels,
    Hop,
    Trace,
};
use metrics::counter;
use serde_json::json;
use tracing::*;

use crate::approval;
use crate::classifier::{
    classify,
    Category,
    ParentState,
};
use crate::context::WebhookContext;

const ANNOTATIONS_POINTER: [&str; 2] = ["metadata", "annotations"];

// The allow/deny verdict plus everything that rides along with it
#[derive(Debug, Default)]
pub(crate) struct Verdict {
    pub denied: Option<String>,
    pub warnings: Vec<String>,
    pub patches: Vec<PatchOperation>,
}

impl Verdict {
    fn allow() -> Verdict {
        Verdict::default()
    }

    fn deny(reason: String) -> Verdict {
        Verdict { denied: Some(reason), ..Default::default() }
    }

    fn warn(mut self, warning: &str) -> Verdict {
        self.warnings.push(warning.into());
        self
    }

    fn into_response(self, resp: AdmissionResponse) -> AdmissionResponse {
        let mut resp = resp;
        if !self.warnings.is_empty() {
            resp.warnings = Some(self.warnings);
        }
        if let Some(reason) = self.denied {
            return resp.deny(reason);
        }
        if self.patches.is_empty() {
            return resp;
        }
        match resp.clone().with_patch(Patch(self.patches)) {
            Ok(patched) => patched,
            Err(err) => {
                // a patch we can't serialize must never block admission
                error!("could not serialize admission patch: {err}");
                resp
            },
        }
    }
}

#[instrument(skip_all, fields(op = ?req.operation, name = %req.name, resource = %req.resource.resource))]
pub async fn handle(ctx: &WebhookContext, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let resp = AdmissionResponse::from(req);
    match admit(ctx, req).await {
        Ok(verdict) => verdict.into_response(resp),
        Err(err) => {
            // only a policy rejection may deny; anything else fails open
            warn!("admission pipeline failed, allowing request: {err:#}");
            Verdict::allow()
                .warn(&format!("kausality could not evaluate this request: {err:#}"))
                .into_response(resp)
        },
    }
}

async fn admit(ctx: &WebhookContext, req: &AdmissionRequest<DynamicObject>) -> anyhow::Result<Verdict> {
    // status updates record the writing controller; other subresources are
    // none of our business
    if let Some(sub) = req.sub_resource.as_deref() {
        if sub != STATUS_SUBRESOURCE {
            return Ok(Verdict::allow());
        }
        return Ok(record_status_writer(req));
    }

    let Some(obj) = req.object.as_ref().or(req.old_object.as_ref()) else {
        return Ok(Verdict::allow());
    };
    let user = req.user_info.username.clone().unwrap_or_default();
    let manager = field_manager(req);

    let namespace = match obj.namespace() {
        Some(ns) => ctx.fetch_namespace(&ns).await,
        None => None,
    };
    let Some(mode) = ctx.resolver.resolve(&req.resource, obj, namespace.as_ref()) else {
        debug!("{} is not tracked by any policy", obj.namespaced_name());
        return Ok(Verdict::allow());
    };

    // an update that left spec untouched carries no causal weight
    if req.operation == Operation::Update {
        if let (Some(old), Some(new)) = (req.old_object.as_ref(), req.object.as_ref()) {
            if jsonutils::spec_fingerprint(&old.data) == jsonutils::spec_fingerprint(&new.data) {
                let mut verdict = Verdict::allow();
                if old.annotations() != new.annotations() {
                    record_updater(new, &user, &mut verdict);
                }
                return Ok(verdict);
            }
        }
    }

    let parent = match ctx.parents.resolve(obj).await {
        Ok(maybe_parent) => maybe_parent,
        Err(err) => {
            warn!("parent lookup for {} failed, allowing: {err:#}", obj.namespaced_name());
            return Ok(Verdict::allow().warn("kausality: parent lookup failed; causality not evaluated"));
        },
    };

    // operators mark the parent; its mode annotation covers the children
    // unless the child carries its own
    let mode = match annotations::get_mode(obj.annotations()) {
        Some(own) => own,
        None => parent
            .as_ref()
            .and_then(|p| annotations::get_mode(p.object.annotations()))
            .unwrap_or(mode),
    };

    let parent_state = parent.as_ref().map(|p| ParentState::from_object(&p.object));
    let deleting = req.object.as_ref().is_some_and(k8s::is_deleting);
    let category = classify(&req.operation, parent_state.as_ref(), deleting, &user, manager.as_deref());
    debug!("classified {} update by {user} as {category}", obj.namespaced_name());

    match category {
        Category::Deletion => Ok(Verdict::allow()),
        Category::Initialization | Category::Propagation => {
            emit_resolved(ctx, req, parent.as_ref(), &user, manager.as_deref());
            Ok(lineage_verdict(ctx, req, TraceSeed::InheritParent, parent.as_ref(), &user))
        },
        Category::UserInitiated => {
            emit_resolved(ctx, req, parent.as_ref(), &user, manager.as_deref());
            Ok(lineage_verdict(ctx, req, TraceSeed::FreshOrigin, parent.as_ref(), &user))
        },
        Category::Drift => match parent.as_ref() {
            Some(parent) => handle_drift(ctx, req, parent, &user, manager.as_deref(), mode).await,
            // the classifier only yields drift when a parent exists
            None => Ok(Verdict::allow()),
        },
    }
}

// Which prior trace the new hop extends
enum TraceSeed {
    // a human (or unrecognized actor) starts a fresh chain
    FreshOrigin,
    // the parent's chain flows down to the child
    InheritParent,
    // the child's own chain continues (drift); falls back to the parent's
    OwnOrParent,
}

fn lineage_verdict(
    ctx: &WebhookContext,
    req: &AdmissionRequest<DynamicObject>,
    seed: TraceSeed,
    parent: Option<&Parent>,
    user: &str,
) -> Verdict {
    let Some(new_obj) = req.object.as_ref() else {
        return Verdict::allow();
    };

    let parent_trace = || match parent {
        Some(p) => read_trace(&p.object),
        None => Trace::default(),
    };
    let base = match seed {
        TraceSeed::FreshOrigin => Trace::default(),
        TraceSeed::InheritParent => parent_trace(),
        TraceSeed::OwnOrParent => {
            let own = read_trace(new_obj);
            if own.is_empty() { parent_trace() } else { own }
        },
    };

    let (api_version, kind) = k8s::api_version_and_kind(new_obj);
    let hop = Hop::new(
        &api_version,
        &kind,
        &new_obj.name_any(),
        k8s::generation(new_obj),
        user,
        &req.uid,
        extract_metadata_labels(new_obj.annotations()),
        &*ctx.clock,
    );
    let trace = base.append(hop);

    let mut verdict = Verdict::allow();
    match trace.serialize() {
        Ok(serialized) => push_annotation_patch(new_obj, TRACE_ANNOTATION_KEY, &serialized, &mut verdict.patches),
        Err(err) => warn!("could not serialize trace for {}: {err}", new_obj.namespaced_name()),
    }

    // a freshly created object starts its lifecycle converging
    if req.operation == Operation::Create {
        let phase = annotations::get_phase(new_obj.annotations()).unwrap_or_default();
        if phase.is_none() {
            push_annotation_patch(
                new_obj,
                PHASE_ANNOTATION_KEY,
                &Phase::Initializing.to_string(),
                &mut verdict.patches,
            );
        }
    }

    record_updater(new_obj, user, &mut verdict);
    verdict
}

async fn handle_drift(
    ctx: &WebhookContext,
    req: &AdmissionRequest<DynamicObject>,
    parent: &Parent,
    user: &str,
    manager: Option<&str>,
    mode: Mode,
) -> anyhow::Result<Verdict> {
    let Some(new_obj) = req.object.as_ref() else {
        return Ok(Verdict::allow());
    };
    let parent_ann = parent.object.annotations();
    let parent_generation = k8s::generation(&parent.object);

    // an active snooze mutes both enforcement and reporting
    match annotations::get_snooze(parent_ann) {
        Ok(Some(snooze)) if snooze.active(&*ctx.clock) => {
            debug!("drift on {} snoozed until {}", new_obj.namespaced_name(), snooze.expiry);
            return Ok(lineage_verdict(ctx, req, TraceSeed::OwnOrParent, Some(parent), user));
        },
        Ok(_) => (),
        Err(err) => warn!("treating malformed snooze as absent: {err}"),
    }

    let (api_version, kind) = k8s::api_version_and_kind(new_obj);
    let child_ref = ChildRef::new(&api_version, &kind, &new_obj.name_any());
    let result = approval::check(parent_ann, &child_ref, parent_generation);

    let mut warnings = vec![];
    let rejections = annotations::get_rejections(parent_ann).unwrap_or_default();
    if rejections.iter().any(|r| r.is_overly_broad()) {
        warnings.push(
            "kausality: a rejection with generation 0 and a wildcard child matches every mutation forever".into(),
        );
    }

    if result.rejected {
        let reason = result.reason.unwrap_or_else(|| "rejected".into());
        if mode == Mode::Enforce {
            let mut verdict = Verdict::deny(reason);
            verdict.warnings = warnings;
            return Ok(verdict);
        }
        info!("would reject drift on {} ({reason}), mode is log", new_obj.namespaced_name());
        dispatch_detected(ctx, req, parent, user, manager);
        let mut verdict = lineage_verdict(ctx, req, TraceSeed::OwnOrParent, Some(parent), user);
        verdict.warnings.extend(warnings);
        return Ok(verdict);
    }

    if result.approved {
        if let Some(approval) = &result.matched_approval {
            if approval.mode == ApprovalMode::Once && !req.dry_run {
                if let Err(err) = consume_approval(ctx, parent, approval, parent_generation).await {
                    warn!("could not consume approval on {}: {err:#}", parent.object.namespaced_name());
                    warnings.push("kausality: approval was used but could not be consumed".into());
                }
            }
        }
        // approved drift is still drift; observers want to see it
        dispatch_detected(ctx, req, parent, user, manager);
        let mut verdict = lineage_verdict(ctx, req, TraceSeed::OwnOrParent, Some(parent), user);
        verdict.warnings.extend(warnings);
        return Ok(verdict);
    }

    // no intent recorded either way
    match mode {
        Mode::Enforce => {
            let detail = result.reason.map(|r| format!(" ({r})")).unwrap_or_default();
            let mut verdict = Verdict::deny(format!(
                "drift detected: {user} mutated {} while parent {} is stable at generation \
                 {parent_generation}, and no approval matches{detail}",
                new_obj.namespaced_name(),
                parent.object.namespaced_name(),
            ));
            verdict.warnings = warnings;
            Ok(verdict)
        },
        Mode::Log => {
            dispatch_detected(ctx, req, parent, user, manager);
            let mut verdict = lineage_verdict(ctx, req, TraceSeed::OwnOrParent, Some(parent), user);
            verdict.warnings.extend(warnings);
            Ok(verdict)
        },
    }
}

// Status subresource writes identify the object's controller; they are also
// where convergence (and thus the end of initialization) becomes visible.
fn record_status_writer(req: &AdmissionRequest<DynamicObject>) -> Verdict {
    let Some(new_obj) = req.object.as_ref() else {
        return Verdict::allow();
    };
    let user = req.user_info.username.clone().unwrap_or_default();

    let mut verdict = Verdict::allow();
    let mut controllers = annotations::get_controllers(new_obj.annotations());
    if controllers.insert_user(&user) {
        push_annotation_patch(new_obj, CONTROLLERS_ANNOTATION_KEY, &controllers.to_string(), &mut verdict.patches);
    }

    if k8s::is_converged(new_obj) {
        let phase = annotations::get_phase(new_obj.annotations()).unwrap_or_default();
        if phase != Some(Phase::Initialized) {
            push_annotation_patch(
                new_obj,
                PHASE_ANNOTATION_KEY,
                &Phase::Initialized.to_string(),
                &mut verdict.patches,
            );
        }
    }

    verdict
}

fn record_updater(obj: &DynamicObject, user: &str, verdict: &mut Verdict) {
    let mut updaters = annotations::get_updaters(obj.annotations());
    if updaters.insert_user(user) {
        push_annotation_patch(obj, UPDATERS_ANNOTATION_KEY, &updaters.to_string(), &mut verdict.patches);
    }
}

// Consumption rewrites the approvals list on the parent through the API; the
// admission patch itself can only touch the object under review.
async fn consume_approval(
    ctx: &WebhookContext,
    parent: &Parent,
    consumed: &Approval,
    parent_generation: i64,
) -> EmptyResult {
    let approvals = annotations::get_approvals(parent.object.annotations())?;
    let (pruned, changed, removed) = approval::prune(approvals, Some(consumed), parent_generation);
    if !changed {
        return Ok(());
    }
    debug!("consuming approval on {} ({removed} entries removed)", parent.object.namespaced_name());

    let api = {
        let mut apiset = ctx.apiset.lock().await;
        apiset.api_for(&parent.gvk, parent.object.namespace().as_deref()).await?
    };
    let patch = json!({
        "metadata": {
            "annotations": {APPROVALS_ANNOTATION_KEY: annotations::serialize_approvals(&pruned)?},
        },
    });
    api.patch(&parent.object.name_any(), &PatchParams::default(), &kube::api::Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn dispatch_detected(
    ctx: &WebhookContext,
    req: &AdmissionRequest<DynamicObject>,
    parent: &Parent,
    user: &str,
    manager: Option<&str>,
) {
    counter!(DRIFT_DETECTED).increment(1);
    if req.dry_run || !ctx.sender.is_enabled() {
        return;
    }
    let report = build_report(req, parent, user, manager, DriftPhase::Detected, true);
    ctx.sender.send_async(report);
}

// Any non-drift mutation of the child means a previously reported episode
// (same fingerprint) is over.
fn emit_resolved(
    ctx: &WebhookContext,
    req: &AdmissionRequest<DynamicObject>,
    parent: Option<&Parent>,
    user: &str,
    manager: Option<&str>,
) {
    let Some(parent) = parent else { return };
    if req.dry_run || !ctx.sender.is_enabled() {
        return;
    }
    let report = build_report(req, parent, user, manager, DriftPhase::Resolved, false);
    ctx.sender.mark_resolved(report.id());
    ctx.sender.send_async(report);
}

fn build_report(
    req: &AdmissionRequest<DynamicObject>,
    parent: &Parent,
    user: &str,
    manager: Option<&str>,
    phase: DriftPhase,
    include_objects: bool,
) -> DriftReport {
    let parent_identity = object_identity(&parent.object);
    let child_obj = req.object.as_ref().or(req.old_object.as_ref());
    let child_identity = child_obj.map(object_identity).unwrap_or_default();
    let id = kz_report::report_fingerprint(&parent_identity, &child_identity);

    DriftReport::new(DriftReportSpec {
        id,
        phase,
        parent: parent_identity,
        child: child_identity,
        request: RequestSummary {
            user: user.into(),
            uid: req.uid.clone(),
            operation: operation_name(&req.operation).into(),
            field_manager: manager.map(String::from),
            subresource: req.sub_resource.clone(),
        },
        old_object: include_objects
            .then(|| req.old_object.as_ref().and_then(|o| serde_json::to_value(o).ok()))
            .flatten(),
        new_object: include_objects
            .then(|| req.object.as_ref().and_then(|o| serde_json::to_value(o).ok()))
            .flatten(),
    })
}

fn object_identity(obj: &DynamicObject) -> ObjectIdentity {
    let (api_version, kind) = k8s::api_version_and_kind(obj);
    ObjectIdentity {
        api_version,
        kind,
        namespace: obj.namespace(),
        name: obj.name_any(),
        generation: obj.metadata.generation,
    }
}

fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

fn field_manager(req: &AdmissionRequest<DynamicObject>) -> Option<String> {
    req.options
        .as_ref()
        .and_then(|o| o.0.get("fieldManager"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn read_trace(obj: &DynamicObject) -> Trace {
    annotations::get_trace(obj.annotations()).unwrap_or_else(|err| {
        warn!("treating malformed trace on {} as empty: {err}", obj.namespaced_name());
        Trace::default()
    })
}

fn push_annotation_patch(obj: &DynamicObject, key: &str, value: &str, patches: &mut Vec<PatchOperation>) {
    let container = PointerBuf::from_tokens(ANNOTATIONS_POINTER);
    if obj.metadata.annotations.is_none()
        && !patches
            .iter()
            .any(|p| matches!(p, PatchOperation::Add(add) if add.path == container))
    {
        patches.push(PatchOperation::Add(AddOperation { path: container, value: json!({}) }));
    }
    patches.push(PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["metadata", "annotations", key]),
        value: json!(value),
    }));
}
