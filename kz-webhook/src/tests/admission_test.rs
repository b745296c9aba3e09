use std::sync::Arc;

use assertables::*;
use clockabilly::mock::MockUtcClock;
use httpmock::prelude::*;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionResponse;
use kz_api::v1alpha1::DriftPhase;
use kz_core::identity::user_hash;
use kz_core::prelude::*;
use kz_core::trace::{
    Hop,
    Trace,
};
use kz_report::MockReportSender;
use kz_testutils::MockServerBuilder;
use serde_json::json;

use super::*;
use crate::admission;
use crate::context::WebhookContext;
use crate::mode::PolicyResolver;
use crate::mode::StaticResolver;

const TEST_TS: i64 = 1234567890;

fn quiet_sender() -> MockReportSender {
    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(false);
    sender
}

fn context(client: kube::Client, mode: Mode, sender: MockReportSender) -> WebhookContext {
    WebhookContext::with_clock(
        client,
        Arc::new(StaticResolver::new(mode)),
        Arc::new(sender),
        Box::new(MockUtcClock::new(TEST_TS)),
    )
}

// A parent that has settled: converged, initialized, and aware of the
// controller that writes its children's status
fn settled_deployment() -> DynamicObject {
    let depl = with_annotation(test_deployment(TEST_DEPLOYMENT), PHASE_ANNOTATION_KEY, "initialized");
    with_annotation(depl, CONTROLLERS_ANNOTATION_KEY, &user_hash(TEST_CONTROLLER_USER))
}

fn mock_parent(fake: &mut MockServerBuilder, parent: &DynamicObject) {
    fake.handle(|when, then| {
        when.method(GET).path("/apis/apps/v1");
        then.json_body(apps_v1_discovery());
    });
    let parent = parent.clone();
    fake.handle(move |when, then| {
        when.method(GET)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"));
        then.json_body(serde_json::to_value(&parent).unwrap());
    });
}

// The RS update every drift test starts from: spec changed by the controller
// that owns the parent's status
fn drift_request(parent: &DynamicObject) -> kube::core::admission::AdmissionRequest<DynamicObject> {
    let rs = with_owner(test_replicaset(TEST_REPLICASET), parent);
    let mut changed = rs.clone();
    changed.data["spec"]["replicas"] = json!(1);
    AdmissionRequestBuilder::update(&rs)
        .with_new_object(&changed)
        .by(TEST_CONTROLLER_USER)
        .with_field_manager(TEST_FIELD_MANAGER)
        .build()
}

fn patch_ops(resp: &AdmissionResponse) -> Vec<serde_json::Value> {
    match &resp.patch {
        Some(bytes) => serde_json::from_slice(bytes).unwrap(),
        None => vec![],
    }
}

fn annotation_patch(resp: &AdmissionResponse, key: &str) -> Option<String> {
    let path = format!("/metadata/annotations/{}", key.replace('~', "~0").replace('/', "~1"));
    patch_ops(resp)
        .iter()
        .find(|op| op["path"] == path)
        .map(|op| op["value"].as_str().unwrap().to_string())
}

fn patched_trace(resp: &AdmissionResponse) -> Trace {
    Trace::parse(annotation_patch(resp, TRACE_ANNOTATION_KEY).as_deref()).unwrap()
}

#[rstest]
#[tokio::test]
async fn test_trace_origin_on_create() {
    let (_fake, client) = make_fake_apiserver();
    let ctx = context(client, Mode::Log, quiet_sender());

    let mut depl = test_deployment("x");
    depl.metadata.generation = None;
    depl.data = json!({"spec": {"replicas": 42}});
    let depl = with_annotation(depl, "kausality.io/trace-ticket", "JIRA-1");

    let req = AdmissionRequestBuilder::create(&depl).by("alice").build();
    let resp = admission::handle(&ctx, &req).await;

    assert!(resp.allowed);
    let trace = patched_trace(&resp);
    assert_eq!(trace.len(), 1);

    let hop = trace.origin().unwrap();
    assert_eq!(hop.api_version, "apps/v1");
    assert_eq!(hop.kind, "Deployment");
    assert_eq!(hop.name, "x");
    assert_eq!(hop.generation, 1);
    assert_eq!(hop.user, "alice");
    assert_eq!(hop.labels, [("ticket".to_string(), "JIRA-1".to_string())].into());

    // a fresh tracked object also starts its lifecycle
    assert_eq!(annotation_patch(&resp, PHASE_ANNOTATION_KEY).as_deref(), Some("initializing"));
}

#[rstest]
#[tokio::test]
async fn test_propagation_inherits_parent_trace() {
    let origin_hop = Hop::new(
        "apps/v1",
        "Deployment",
        TEST_DEPLOYMENT,
        3,
        "alice",
        "orig-req-uid",
        Default::default(),
        &MockUtcClock::new(TEST_TS),
    );
    let parent_trace = Trace::new(vec![origin_hop.clone()]);

    let parent = with_generations(settled_deployment(), 3, 2);
    let parent = with_annotation(parent, TRACE_ANNOTATION_KEY, &parent_trace.serialize().unwrap());

    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let ctx = context(client, Mode::Log, quiet_sender());
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(resp.allowed);
    let trace = patched_trace(&resp);
    assert_eq!(trace.len(), 2);
    assert_eq!(trace.origin(), Some(&origin_hop));
    assert_eq!(trace.hops()[1].kind, "ReplicaSet");
    assert_eq!(trace.hops()[1].generation, 2);
    assert_eq!(trace.hops()[1].user, TEST_CONTROLLER_USER);
    fake.assert();
}

#[rstest]
#[tokio::test]
async fn test_drift_detected_in_log_mode() {
    let parent = settled_deployment();
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(true);
    sender
        .expect_send_async()
        .withf(|report| report.phase() == DriftPhase::Detected && !report.id().is_empty())
        .times(1)
        .returning(|_| ());

    let ctx = context(client, Mode::Log, sender);
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(resp.allowed);
    // the drift hop still lands on the child's chain
    let trace = patched_trace(&resp);
    assert_eq!(trace.hops().last().unwrap().user, TEST_CONTROLLER_USER);
}

#[rstest]
#[tokio::test]
async fn test_drift_rejected_in_enforce_mode() {
    // the enforce mode rides on the parent's annotation
    let parent = with_annotation(settled_deployment(), MODE_ANNOTATION_KEY, "enforce");
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let ctx = context(client, Mode::Log, quiet_sender());
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(!resp.allowed);
    assert_contains!(resp.result.message, "drift");
    assert_none!(resp.patch);
}

#[rstest]
#[tokio::test]
async fn test_drift_allowed_by_always_approval() {
    let parent = with_annotation(
        settled_deployment(),
        APPROVALS_ANNOTATION_KEY,
        &json!([{"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "*", "mode": "always"}]).to_string(),
    );
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(true);
    sender
        .expect_send_async()
        .withf(|report| report.phase() == DriftPhase::Detected)
        .times(1)
        .returning(|_| ());

    let ctx = context(client, Mode::Enforce, sender);
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    // approved, but observers still hear about it
    assert!(resp.allowed);
}

#[rstest]
#[tokio::test]
async fn test_freeze_blocks_approved_drift() {
    let parent = with_annotation(
        settled_deployment(),
        APPROVALS_ANNOTATION_KEY,
        &json!([{"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "*", "mode": "always"}]).to_string(),
    );
    let parent = with_annotation(parent, FREEZE_ANNOTATION_KEY, "true");

    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let ctx = context(client, Mode::Enforce, quiet_sender());
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(!resp.allowed);
    assert_starts_with!(resp.result.message, "frozen");
}

#[rstest]
#[tokio::test]
async fn test_once_approval_consumed_through_api() {
    let parent = with_annotation(
        settled_deployment(),
        APPROVALS_ANNOTATION_KEY,
        &json!([{"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "*", "generation": 5, "mode": "once"}])
            .to_string(),
    );

    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);
    let consumed = parent.clone();
    fake.handle(move |when, then| {
        when.method(PATCH)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"));
        then.json_body(serde_json::to_value(&consumed).unwrap());
    });

    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(true);
    sender.expect_send_async().times(1).returning(|_| ());

    let ctx = context(client, Mode::Enforce, sender);
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(resp.allowed);
    fake.assert();
}

#[rstest]
#[tokio::test]
async fn test_drift_snoozed() {
    let snooze = json!({"expiry": clockabilly::DateTime::from_timestamp(TEST_TS + 3600, 0).unwrap()});
    let parent = with_annotation(settled_deployment(), SNOOZE_ANNOTATION_KEY, &snooze.to_string());
    let parent = with_annotation(parent, MODE_ANNOTATION_KEY, "enforce");

    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    // no reports, no enforcement while the snooze is active
    let ctx = context(client, Mode::Enforce, MockReportSender::new());
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(resp.allowed);
}

#[rstest]
#[tokio::test]
async fn test_user_update_resolves_prior_drift() {
    let parent = settled_deployment();
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(true);
    sender.expect_mark_resolved().times(1).returning(|_| ());
    sender
        .expect_send_async()
        .withf(|report| report.phase() == DriftPhase::Resolved)
        .times(1)
        .returning(|_| ());

    let rs = with_owner(test_replicaset(TEST_REPLICASET), &parent);
    let mut changed = rs.clone();
    changed.data["spec"]["replicas"] = json!(7);
    let req = AdmissionRequestBuilder::update(&rs).with_new_object(&changed).by(TEST_USER).build();

    let ctx = context(client, Mode::Log, sender);
    let resp = admission::handle(&ctx, &req).await;

    assert!(resp.allowed);
    // a human touched it: the chain starts over
    let trace = patched_trace(&resp);
    assert_eq!(trace.len(), 1);
    assert_eq!(trace.origin().unwrap().user, TEST_USER);
}

#[rstest]
#[tokio::test]
async fn test_dry_run_emits_nothing() {
    let parent = settled_deployment();
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let rs = with_owner(test_replicaset(TEST_REPLICASET), &parent);
    let mut changed = rs.clone();
    changed.data["spec"]["replicas"] = json!(1);
    let req = AdmissionRequestBuilder::update(&rs)
        .with_new_object(&changed)
        .by(TEST_CONTROLLER_USER)
        .dry_run()
        .build();

    let ctx = context(client, Mode::Log, MockReportSender::new());
    let resp = admission::handle(&ctx, &req).await;
    assert!(resp.allowed);
}

#[rstest]
#[tokio::test]
async fn test_status_update_records_controller_and_phase() {
    let (_fake, client) = make_fake_apiserver();
    let ctx = context(client, Mode::Enforce, quiet_sender());

    let depl = test_deployment(TEST_DEPLOYMENT);
    let req = AdmissionRequestBuilder::update(&depl)
        .by(TEST_CONTROLLER_USER)
        .with_subresource("status")
        .build();

    let resp = admission::handle(&ctx, &req).await;
    assert!(resp.allowed);
    assert_eq!(
        annotation_patch(&resp, CONTROLLERS_ANNOTATION_KEY),
        Some(user_hash(TEST_CONTROLLER_USER))
    );
    assert_eq!(annotation_patch(&resp, PHASE_ANNOTATION_KEY).as_deref(), Some("initialized"));
}

#[rstest]
#[tokio::test]
async fn test_other_subresources_untouched() {
    let (_fake, client) = make_fake_apiserver();
    let ctx = context(client, Mode::Enforce, quiet_sender());

    let req = AdmissionRequestBuilder::update(&test_deployment(TEST_DEPLOYMENT))
        .with_subresource("scale")
        .build();

    let resp = admission::handle(&ctx, &req).await;
    assert!(resp.allowed);
    assert_none!(resp.patch);
}

#[rstest]
#[tokio::test]
async fn test_spec_unchanged_records_updater_only() {
    let (_fake, client) = make_fake_apiserver();
    let ctx = context(client, Mode::Enforce, quiet_sender());

    let rs = test_replicaset(TEST_REPLICASET);
    let annotated = with_annotation(rs.clone(), "some-annotation", "new-value");
    let req = AdmissionRequestBuilder::update(&rs).with_new_object(&annotated).by(TEST_USER).build();

    let resp = admission::handle(&ctx, &req).await;
    assert!(resp.allowed);
    assert_some!(annotation_patch(&resp, UPDATERS_ANNOTATION_KEY));
    assert_none!(annotation_patch(&resp, TRACE_ANNOTATION_KEY));
}

#[rstest]
#[tokio::test]
async fn test_untracked_resource_untouched() {
    let (_fake, client) = make_fake_apiserver();
    let resolver = PolicyResolver::new(client.clone());
    let ctx = WebhookContext::with_clock(
        client,
        Arc::new(resolver),
        Arc::new(quiet_sender()),
        Box::new(MockUtcClock::new(TEST_TS)),
    );

    let rs = test_replicaset(TEST_REPLICASET);
    let mut changed = rs.clone();
    changed.data["spec"]["replicas"] = json!(1);
    let req = AdmissionRequestBuilder::update(&rs).with_new_object(&changed).build();

    let resp = admission::handle(&ctx, &req).await;
    assert!(resp.allowed);
    assert_none!(resp.patch);
}

#[rstest]
#[tokio::test]
async fn test_parent_lookup_failure_fails_open() {
    let (mut fake, client) = make_fake_apiserver();
    fake.handle(|when, then| {
        when.method(GET).path("/apis/apps/v1");
        then.json_body(apps_v1_discovery());
    });
    fake.handle(move |when, then| {
        when.method(GET)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"));
        then.status(500).json_body(json!({"kind": "Status", "status": "Failure", "code": 500}));
    });

    let ctx = context(client, Mode::Enforce, quiet_sender());
    let resp = admission::handle(&ctx, &drift_request(&settled_deployment())).await;

    assert!(resp.allowed);
    assert_contains!(resp.warnings.unwrap().join(" "), "parent lookup failed");
}

#[rstest]
#[tokio::test]
async fn test_broad_rejection_warns() {
    // matches nothing here (wrong kind), but generation 0 + wildcard is a
    // footgun worth flagging
    let parent = with_annotation(
        settled_deployment(),
        REJECTIONS_ANNOTATION_KEY,
        &json!([{"apiVersion": "apps/v1", "kind": "Deployment", "name": "*", "generation": 0, "reason": "no"}])
            .to_string(),
    );
    let (mut fake, client) = make_fake_apiserver();
    mock_parent(&mut fake, &parent);

    let mut sender = MockReportSender::new();
    sender.expect_is_enabled().return_const(true);
    sender.expect_send_async().times(1).returning(|_| ());

    let ctx = context(client, Mode::Log, sender);
    let resp = admission::handle(&ctx, &drift_request(&parent)).await;

    assert!(resp.allowed);
    assert_contains!(resp.warnings.unwrap().join(" "), "generation 0");
}
