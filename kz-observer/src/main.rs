mod api;

use std::net::{
    IpAddr,
    Ipv4Addr,
};

use anyhow::anyhow;
use clap::Parser;
use kz_core::errors::*;
use kz_core::logging;
use kz_core::prelude::*;
use tracing::*;

use crate::api::DriftStore;

#[derive(Clone, Debug, Parser)]
struct Options {
    #[arg(long, default_value = OBSERVER_PORT)]
    port: u16,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[instrument(ret, err)]
async fn run(opts: Options) -> EmptyResult {
    let rkt_config = rocket::Config {
        address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: opts.port,
        ..Default::default()
    };

    rocket::custom(&rkt_config)
        .mount("/", api::routes())
        .manage(DriftStore::new())
        .launch()
        .await
        .map(|_| ())
        .map_err(|err| anyhow!("observer server terminated: {err}"))
}

#[tokio::main]
async fn main() {
    let args = Options::parse();
    logging::setup(&format!("{},rocket=warn", args.verbosity));
    if let Err(err) = run(args).await {
        kzerr!(err, "observer failed");
        std::process::exit(1);
    }
}
