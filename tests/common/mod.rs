#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// A `helpdesk serve` child process, killed when dropped
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_helpdesk"));
        cmd.arg("serve")
            .env("HELPDESK_HOST", "127.0.0.1")
            .env("HELPDESK_PORT", port.to_string())
            .env("DATABASE_RUN_MIGRATIONS", "true")
            .env("SECURITY_ALLOW_PUBLIC_REGISTRATION", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // Inherit environment so the server can see DATABASE_URL from .env (loaded by the server)
        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// True when the server reports a reachable database
    pub async fn has_database(&self) -> Result<bool> {
        let res = reqwest::get(self.url("/health")).await?;
        Ok(res.status() == StatusCode::OK)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start a server owned by the calling test
pub async fn start_server() -> Result<TestServer> {
    let server = TestServer::spawn()?;
    server.wait_ready(Duration::from_secs(20)).await?;
    Ok(server)
}

/// Email unique to this test run
pub fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, uuid::Uuid::new_v4().simple())
}

/// Send a request and decode the JSON body, tolerating empty bodies
pub async fn send(request: reqwest::RequestBuilder) -> Result<(StatusCode, Value)> {
    let res = request.send().await?;
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    Ok((status, body))
}

/// Register through `/auth/register/:kind` and return the token and account
pub async fn register(server: &TestServer, kind: &str, extra: Value) -> Result<(String, Value)> {
    let mut body = json!({
        "name": format!("Test {}", kind),
        "email": unique_email(kind),
        "password": "long-enough-pass"
    });
    if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), extra) {
        target.extend(extra);
    }

    let (status, body) = send(reqwest::Client::new().post(server.url(&format!("/auth/register/{}", kind))).json(&body)).await?;
    anyhow::ensure!(status == StatusCode::CREATED, "register {} failed: {} {}", kind, status, body);

    let token = body["token"].as_str().unwrap_or_default().to_string();
    Ok((token, body["user"].clone()))
}

/// Register a team manager with a brand new team
pub async fn register_team_manager(server: &TestServer) -> Result<(String, Value)> {
    let team_name = format!("Desk {}", uuid::Uuid::new_v4().simple());
    register(server, "team", json!({ "teamName": team_name, "department": "IT" })).await
}

/// Field names listed in a `ValidationFailed` body
pub fn detail_fields(body: &Value) -> Vec<String> {
    body["details"]
        .as_array()
        .map(|d| d.iter().filter_map(|e| e["field"].as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
