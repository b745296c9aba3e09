use std::collections::HashMap;
use std::sync::Mutex;

use kz_api::v1alpha1::{
    DriftPhase,
    DriftReport,
};
use rocket::http::Status;
use rocket::serde::json::Json;
use serde_json::{
    json,
    Value,
};
use tracing::*;

#[derive(Default)]
pub struct DriftStore {
    reports: Mutex<HashMap<String, DriftReport>>,
}

impl DriftStore {
    pub fn new() -> DriftStore {
        DriftStore::default()
    }
}

#[rocket::post("/webhook", data = "<body>")]
pub fn receive(store: &rocket::State<DriftStore>, body: &str) -> Result<Json<Value>, Status> {
    let report: DriftReport = serde_json::from_str(body).map_err(|err| {
        warn!("rejecting malformed drift report: {err}");
        Status::BadRequest
    })?;

    let id = report.id().to_string();
    let mut reports = store.reports.lock().unwrap();
    match report.phase() {
        DriftPhase::Detected => {
            info!("drift detected: {id} ({} -> {})", report.spec.parent.name, report.spec.child.name);
            reports.insert(id, report);
        },
        DriftPhase::Resolved => {
            info!("drift resolved: {id}");
            reports.remove(&id);
        },
    }
    Ok(Json(json!({"acknowledged": true})))
}

#[rocket::get("/api/v1/drifts")]
pub fn list(store: &rocket::State<DriftStore>) -> Json<Value> {
    let reports = store.reports.lock().unwrap();
    let mut items: Vec<_> = reports.values().cloned().collect();
    items.sort_by(|a, b| a.id().cmp(b.id()));
    Json(json!({"items": items, "count": items.len()}))
}

#[rocket::get("/api/v1/drifts/<id>")]
pub fn get(store: &rocket::State<DriftStore>, id: &str) -> Option<Json<DriftReport>> {
    let reports = store.reports.lock().unwrap();
    reports.get(id).cloned().map(Json)
}

#[rocket::delete("/api/v1/drifts/<id>")]
pub fn delete(store: &rocket::State<DriftStore>, id: &str) -> Status {
    let mut reports = store.reports.lock().unwrap();
    match reports.remove(id) {
        Some(_) => Status::NoContent,
        None => Status::NotFound,
    }
}

#[rocket::get("/healthz")]
pub fn healthz() -> &'static str {
    "ok"
}

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![receive, list, get, delete, healthz]
}

#[cfg(test)]
mod test {
    use kz_api::v1alpha1::{
        DriftReportSpec,
        ObjectIdentity,
        RequestSummary,
    };
    use rocket::local::blocking::Client;
    use rstest::*;

    use super::*;

    fn report(id: &str, phase: DriftPhase) -> DriftReport {
        DriftReport::new(DriftReportSpec {
            id: id.into(),
            phase,
            parent: ObjectIdentity {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                namespace: Some("test".into()),
                name: "the-deployment".into(),
                generation: Some(5),
            },
            child: ObjectIdentity {
                api_version: "apps/v1".into(),
                kind: "ReplicaSet".into(),
                namespace: Some("test".into()),
                name: "the-replicaset".into(),
                generation: Some(2),
            },
            request: RequestSummary::default(),
            old_object: None,
            new_object: None,
        })
    }

    fn test_client() -> Client {
        let rocket = rocket::build().mount("/", routes()).manage(DriftStore::new());
        Client::tracked(rocket).unwrap()
    }

    fn post_report(client: &Client, report: &DriftReport) -> rocket::http::Status {
        client
            .post("/webhook")
            .body(serde_json::to_string(report).unwrap())
            .dispatch()
            .status()
    }

    #[rstest]
    fn test_detected_acknowledged_and_listed() {
        let client = test_client();

        let status = post_report(&client, &report("drift-1", DriftPhase::Detected));
        assert_eq!(status, Status::Ok);

        let body: Value = client.get("/api/v1/drifts").dispatch().into_json().unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["items"][0]["spec"]["id"], "drift-1");

        let detail = client.get("/api/v1/drifts/drift-1").dispatch();
        assert_eq!(detail.status(), Status::Ok);
    }

    #[rstest]
    fn test_resolved_removes_entry() {
        let client = test_client();

        post_report(&client, &report("drift-1", DriftPhase::Detected));
        post_report(&client, &report("drift-1", DriftPhase::Resolved));

        let body: Value = client.get("/api/v1/drifts").dispatch().into_json().unwrap();
        assert_eq!(body["count"], 0);
        assert_eq!(client.get("/api/v1/drifts/drift-1").dispatch().status(), Status::NotFound);
    }

    #[rstest]
    fn test_malformed_body_rejected() {
        let client = test_client();
        let resp = client.post("/webhook").body("{definitely not json").dispatch();
        assert_eq!(resp.status(), Status::BadRequest);
    }

    #[rstest]
    fn test_delete_endpoint() {
        let client = test_client();
        post_report(&client, &report("drift-1", DriftPhase::Detected));

        assert_eq!(client.delete("/api/v1/drifts/drift-1").dispatch().status(), Status::NoContent);
        assert_eq!(client.delete("/api/v1/drifts/drift-1").dispatch().status(), Status::NotFound);
    }

    #[rstest]
    fn test_healthz() {
        let client = test_client();
        let resp = client.get("/healthz").dispatch();
        assert_eq!(resp.status(), Status::Ok);
        assert_eq!(resp.into_string().unwrap(), "ok");
    }
}
