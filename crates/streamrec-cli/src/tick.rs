use anyhow::{Context, Result, bail};
use serde_json::Value;

use streamrec_config::StreamRecConfig;

use crate::app::App;

/// Run one tick.
///
/// A capture process only lives as long as the process that spawned it,
/// so a real tick is delegated to the running `serve` instance. With
/// `dry_run` nothing is ticked: the schedule is evaluated locally and
/// the decision printed, leaving rules and run state as they are.
pub async fn run_tick(
    config: &StreamRecConfig,
    dry_run: bool,
    url: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let outcome = if dry_run {
        let app = App::build(config, true)?;
        serde_json::to_value(app.engine.preview().await?)?
    } else {
        let base = url.unwrap_or_else(|| {
            format!("http://{}:{}", config.gateway.host, config.gateway.port)
        });
        let token = token.or_else(|| config.gateway.auth_token.clone());
        remote_tick(&base, token.as_deref()).await?
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn remote_tick(base: &str, token: Option<&str>) -> Result<Value> {
    let url = format!("{}/api/scheduler/tick", base.trim_end_matches('/'));
    let mut request = reqwest::Client::new().post(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach gateway at {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("Gateway returned {status}");
    }
    response
        .json::<Value>()
        .await
        .context("Failed to parse tick response")
}
