use std::sync::Arc;

use clockabilly::{
    Clockable,
    UtcClock,
};
use kz_core::k8s::{
    DynamicApiSet,
    ParentResolver,
};
use kz_core::prelude::*;
use kz_report::ReportSender;
use tokio::sync::Mutex;
use tracing::*;

use crate::mode::ModeResolver;

pub struct WebhookContext {
    pub client: kube::Client,
    pub apiset: Arc<Mutex<DynamicApiSet>>,
    pub parents: ParentResolver,
    pub resolver: Arc<dyn ModeResolver>,
    pub sender: Arc<dyn ReportSender>,
    pub clock: Box<dyn Clockable + Send + Sync>,
}

impl WebhookContext {
    pub fn new(
        client: kube::Client,
        resolver: Arc<dyn ModeResolver>,
        sender: Arc<dyn ReportSender>,
    ) -> WebhookContext {
        WebhookContext::with_clock(client, resolver, sender, Box::new(UtcClock::new()))
    }

    pub fn with_clock(
        client: kube::Client,
        resolver: Arc<dyn ModeResolver>,
        sender: Arc<dyn ReportSender>,
        clock: Box<dyn Clockable + Send + Sync>,
    ) -> WebhookContext {
        let apiset = Arc::new(Mutex::new(DynamicApiSet::new(client.clone())));
        WebhookContext {
            client,
            apiset: apiset.clone(),
            parents: ParentResolver::with_shared(apiset),
            resolver,
            sender,
            clock,
        }
    }

    // Namespace annotations and labels feed mode resolution; a namespace we
    // can't fetch just doesn't contribute.
    pub async fn fetch_namespace(&self, name: &str) -> Option<corev1::Namespace> {
        let api = kube::Api::<corev1::Namespace>::all(self.client.clone());
        match api.get_opt(name).await {
            Ok(maybe_ns) => maybe_ns,
            Err(err) => {
                warn!("could not fetch namespace {name}: {err}");
                None
            },
        }
    }
}
