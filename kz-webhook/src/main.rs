mod admission;
mod approval;
mod classifier;
mod context;
mod mode;
mod webhook;

use std::fs;
use std::net::{
    IpAddr,
    Ipv4Addr,
};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use kz_core::errors::*;
use kz_core::logging;
use kz_core::prelude::*;
use kz_report::{
    MultiSender,
    ReportSender,
};
use rocket::config::TlsConfig;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::*;
use url::Url;

use crate::context::WebhookContext;
use crate::mode::{
    ModeResolver,
    PolicyResolver,
    StaticResolver,
};

#[derive(Clone, Debug, Parser)]
struct Options {
    #[arg(long, default_value = WEBHOOK_PORT)]
    port: u16,

    #[arg(long, requires = "key_path")]
    cert_path: Option<String>,

    #[arg(long, requires = "cert_path")]
    key_path: Option<String>,

    // Repeatable; merged with the endpoints from --sink-config
    #[arg(long)]
    sink_url: Vec<String>,

    #[arg(long)]
    sink_config: Option<String>,

    // Bypasses the policy cache entirely; everything is tracked at this mode
    #[arg(long)]
    static_mode: Option<Mode>,

    #[arg(long, default_value_t = DEFAULT_POLICY_REFRESH_SECONDS)]
    policy_refresh_seconds: u64,

    #[arg(long, default_value_t = 3600)]
    report_cleanup_seconds: u64,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[derive(Debug, Default, Deserialize)]
struct SinkConfig {
    endpoints: Vec<String>,
}

fn load_sink_endpoints(opts: &Options) -> anyhow::Result<Vec<Url>> {
    let mut raw = opts.sink_url.clone();
    if let Some(path) = &opts.sink_config {
        let config: SinkConfig = serde_yaml::from_slice(
            &fs::read(path).map_err(|e| anyhow!("error reading sink config {path}: {e}"))?,
        )
        .map_err(|e| anyhow!("error parsing sink config {path}: {e}"))?;
        raw.extend(config.endpoints);
    }

    raw.iter()
        .map(|e| e.parse().map_err(|err| anyhow!("invalid sink endpoint {e}: {err}")))
        .collect()
}

#[instrument(ret, err, skip(endpoints))]
async fn run(opts: Options, endpoints: Vec<Url>) -> EmptyResult {
    let client = kube::Client::try_default().await?;

    let resolver: Arc<dyn ModeResolver> = match opts.static_mode {
        Some(mode) => Arc::new(StaticResolver::new(mode)),
        None => {
            let resolver = Arc::new(PolicyResolver::new(client.clone()));
            resolver.refresh().await?;

            let refresher = resolver.clone();
            let refresh_interval = Duration::from_secs(opts.policy_refresh_seconds);
            tokio::spawn(async move {
                loop {
                    sleep(refresh_interval).await;
                    if let Err(err) = refresher.refresh().await {
                        warn!("policy refresh failed: {err:#}");
                    }
                }
            });
            resolver
        },
    };

    let sender = Arc::new(MultiSender::from_endpoints(endpoints));
    if !sender.is_enabled() {
        info!("no drift-report sinks configured, reports stay local");
    }
    let cleanup = sender.start_cleanup(Duration::from_secs(opts.report_cleanup_seconds));

    let ctx = WebhookContext::new(client, resolver, sender);

    let tls = match (&opts.cert_path, &opts.key_path) {
        (Some(cert), Some(key)) => Some(TlsConfig::from_paths(cert, key)),
        _ => None,
    };
    let rkt_config = rocket::Config {
        address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: opts.port,
        tls,
        ..Default::default()
    };

    let result = rocket::custom(&rkt_config)
        .mount("/", rocket::routes![webhook::handler, webhook::healthz])
        .manage(ctx)
        .launch()
        .await;

    cleanup.stop();
    result.map(|_| ()).map_err(|err| anyhow!("webhook server terminated: {err}"))
}

#[tokio::main]
async fn main() {
    let args = Options::parse();
    logging::setup(&format!("{},rocket=warn", args.verbosity));

    let endpoints = match load_sink_endpoints(&args) {
        Ok(endpoints) => endpoints,
        Err(err) => {
            error!("configuration error: {err:#}");
            std::process::exit(2);
        },
    };

    if let Err(err) = run(args, endpoints).await {
        kzerr!(err, "webhook failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests;
