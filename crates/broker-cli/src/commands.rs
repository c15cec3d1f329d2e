use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use broker_api::{build_app, Broker};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::runtime::{build_runtime, load_config};

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config: Option<PathBuf>, bind: String, port: u16, rotate_token: bool) -> Result<()> {
    let config = load_config(config)?;
    let runtime = build_runtime(config).await?;

    let token_path = default_token_path();
    let token = if rotate_token {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Rotated token (written to {})", token_path.display());
        println!("New token: {t}");
        t
    } else if let Ok(existing) = std::fs::read_to_string(&token_path).map(|s| s.trim().to_string()) {
        if existing.is_empty() {
            let t = generate_token();
            write_token(&token_path, &t)?;
            println!("Generated new token (written to {})", token_path.display());
            t
        } else {
            println!("Reusing existing token from {}", token_path.display());
            existing
        }
    } else {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Generated new token (written to {})", token_path.display());
        t
    };

    let broker = Arc::new(Broker::new(
        runtime.engine,
        runtime.templates,
        runtime.machines,
        runtime.requests,
        runtime.config,
        HashMap::new(),
    ));

    let addr = format!("{bind}:{port}");
    println!("Starting broker API server on http://{addr}");
    let app = build_app(broker, token);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

// ── getAvailableTemplates ─────────────────────────────────────────────────────

pub async fn templates(config: Option<PathBuf>, remote: Option<String>, token: Option<String>, long: bool) -> Result<()> {
    if let Some(url) = remote {
        let body = json!({ "long": long });
        let resp = authed_client(&resolve_token(token)?)
            .get(format!("{}/templates", server_url(Some(url))))
            .json(&body)
            .send()
            .await
            .context("requesting templates")?;
        print_response(resp).await
    } else {
        let runtime = build_runtime(load_config(config)?).await?;
        let broker = local_broker(runtime);
        print_json(broker.list_templates(long).await.map_err(api_err)?)
    }
}

// ── requestMachines ───────────────────────────────────────────────────────────

pub async fn request_machines(
    config: Option<PathBuf>,
    remote: Option<String>,
    token: Option<String>,
    template_id: String,
    count: u32,
) -> Result<()> {
    if let Some(url) = remote {
        let body = json!({ "template": { "templateId": template_id, "machineCount": count } });
        let resp = authed_client(&resolve_token(token)?)
            .post(format!("{}/machines", server_url(Some(url))))
            .json(&body)
            .send()
            .await
            .context("requesting machines")?;
        print_response(resp).await
    } else {
        let runtime = build_runtime(load_config(config)?).await?;
        let broker = local_broker(runtime);
        let result = broker
            .request_machines(&template_id, count, HashMap::new(), Value::Null)
            .await
            .map_err(api_err)?;
        print_json(result)
    }
}

// ── requestReturnMachines ─────────────────────────────────────────────────────

pub async fn request_return_machines(
    config: Option<PathBuf>,
    remote: Option<String>,
    token: Option<String>,
    machine_ids: Vec<String>,
    all: bool,
) -> Result<()> {
    if let Some(url) = remote {
        let body = json!({
            "machines": machine_ids.iter().map(|id| json!({ "machineId": id })).collect::<Vec<_>>(),
            "all": all,
        });
        let resp = authed_client(&resolve_token(token)?)
            .post(format!("{}/machines/return", server_url(Some(url))))
            .json(&body)
            .send()
            .await
            .context("requesting return")?;
        print_response(resp).await
    } else {
        let runtime = build_runtime(load_config(config)?).await?;
        let broker = local_broker(runtime);
        let result = broker
            .request_return_machines(machine_ids, all)
            .await
            .map_err(api_err)?;
        print_json(result)
    }
}

// ── getRequestStatus ──────────────────────────────────────────────────────────

pub async fn request_status(
    config: Option<PathBuf>,
    remote: Option<String>,
    token: Option<String>,
    request_ids: Vec<String>,
    all: bool,
) -> Result<()> {
    if let Some(url) = remote {
        let body = json!({
            "requests": request_ids.iter().map(|id| json!({ "requestId": id })).collect::<Vec<_>>(),
            "all": all,
        });
        let resp = authed_client(&resolve_token(token)?)
            .post(format!("{}/requests/status", server_url(Some(url))))
            .json(&body)
            .send()
            .await
            .context("requesting status")?;
        print_response(resp).await
    } else {
        let runtime = build_runtime(load_config(config)?).await?;
        let broker = local_broker(runtime);
        let result = broker
            .get_request_status(request_ids, all)
            .await
            .map_err(api_err)?;
        print_json(result)
    }
}

// ── getReturnRequests ─────────────────────────────────────────────────────────

pub async fn return_requests(config: Option<PathBuf>, remote: Option<String>, token: Option<String>, long: bool) -> Result<()> {
    if let Some(url) = remote {
        let body = json!({ "long": long });
        let resp = authed_client(&resolve_token(token)?)
            .get(format!("{}/requests/returns", server_url(Some(url))))
            .json(&body)
            .send()
            .await
            .context("requesting returns")?;
        print_response(resp).await
    } else {
        let runtime = build_runtime(load_config(config)?).await?;
        let broker = local_broker(runtime);
        print_json(broker.get_return_requests(long).await.map_err(api_err)?)
    }
}

fn api_err(e: broker_api::ApiError) -> anyhow::Error {
    anyhow::anyhow!("{} ({}): {}", e.error_type, e.status, e.message)
}

fn local_broker(runtime: crate::runtime::Runtime) -> Broker {
    Broker::new(
        runtime.engine,
        runtime.templates,
        runtime.machines,
        runtime.requests,
        runtime.config,
        HashMap::new(),
    )
}

fn print_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn print_response(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let body: Value = resp.json().await.context("decoding response body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}

// ── Token helpers ─────────────────────────────────────────────────────────────
//
// Bearer token persisted at ~/.broker, reused across invocations unless
// rotated.

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path).map(|s| s.trim().to_string()).with_context(|| {
        format!(
            "No token provided and could not read token file at {}. \
             Use --token, BROKER_TOKEN, or run `broker serve` first.",
            path.display()
        )
    })
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token).with_context(|| format!("failed to write token to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".broker").join("token")
}

fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer).expect("token contains invalid header characters"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}

fn server_url(remote: Option<String>) -> String {
    remote.unwrap_or_else(|| "http://localhost:8080".into())
}
