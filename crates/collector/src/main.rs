// Copyright (C) 2024-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use homeflow_collector::{config::CollectorConfig, init_flow_collection};
use std::{path::Path, str::FromStr};
use tracing::{error, info, Level};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// YAML file first, `HOMEFLOW_` variables override it, e.g.
/// `HOMEFLOW_STORAGE__URL` sets `storage.url`
fn load_config(path: &Path) -> Result<CollectorConfig, figment::Error> {
    Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("HOMEFLOW_").split("__"))
        .extract()
}

fn init_tracing(level: &str) -> Result<(), BoxError> {
    let level = Level::from_str(level).map_err(|err| format!("logging.level {level}: {err}"))?;
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for ctrl-c, running until killed: {err}");
        std::future::pending::<()>().await;
    }
}

fn main() -> Result<(), BoxError> {
    let Some(path) = std::env::args().nth(1) else {
        return Err("usage: homeflow-collector <config.yaml>".into());
    };
    let config =
        load_config(Path::new(&path)).map_err(|err| format!("invalid config {path}: {err}"))?;
    init_tracing(&config.logging.level)?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = config.runtime.threads {
        runtime.worker_threads(threads);
    }
    let runtime = runtime.enable_all().build()?;
    if let Err(err) = runtime.block_on(init_flow_collection(config, ctrl_c())) {
        error!("Collector failed: {err:#}");
        return Err(err.into());
    }
    info!("Collector stopped");
    Ok(())
}
