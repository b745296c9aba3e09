use kube::api::DynamicObject;
use kube::core::admission::{
    AdmissionRequest,
    AdmissionResponse,
    AdmissionReview,
};
use rocket::serde::json::Json;
use tracing::*;

use crate::admission;
use crate::context::WebhookContext;

#[rocket::post("/", data = "<body>")]
#[instrument(parent=None, skip_all)]
pub async fn handler(
    ctx: &rocket::State<WebhookContext>,
    body: Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<_> = match body.into_inner().try_into() {
        Ok(r) => r,
        Err(err) => {
            error!("could not parse admission request: {err:?}");
            return Json(AdmissionResponse::invalid(err).into_review());
        },
    };

    let resp = admission::handle(ctx, &req).await;
    Json(resp.into_review())
}

#[rocket::get("/healthz")]
pub fn healthz() -> &'static str {
    "ok"
}
