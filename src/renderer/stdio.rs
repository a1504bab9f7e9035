use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::RendererCommand;
use crate::error::{Result, SimError};
use crate::job::spec::LocalizedEdit;
use crate::renderer::{RenderSession, RendererLauncher, RendererProcess};

const TERMINATE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Request/response channel over a renderer's stdin/stdout.
struct Channel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    closed: bool,
}

impl Channel {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        if self.closed {
            return Err(SimError::remote(method, "renderer disconnected"));
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, method, params })?;
        line.push('\n');
        // Stays set if this future is dropped mid-write, leaving a torn line
        self.closed = true;
        if let Err(e) = self.send(line.as_bytes()).await {
            return Err(SimError::remote(method, e));
        }
        self.closed = false;

        loop {
            let line = match self.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.closed = true;
                    return Err(SimError::remote(method, "renderer disconnected"));
                }
                Err(e) => {
                    self.closed = true;
                    return Err(SimError::remote(method, e));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(method, error = %e, line = %line, "Ignoring non-protocol renderer output");
                    continue;
                }
            };
            // Replies to calls abandoned after a timeout
            if response.id != id {
                tracing::debug!(expected = id, got = response.id, "Skipping stale renderer response");
                continue;
            }

            return match response.error {
                Some(error) => Err(SimError::remote(method, error)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await
    }
}

/// Spawns renderer processes from a [`RendererCommand`].
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    command: RendererCommand,
}

impl StdioLauncher {
    pub fn new(command: RendererCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl RendererLauncher for StdioLauncher {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn RendererProcess>> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .envs(&self.command.env)
            .env("SIMFORGE_WORKER_ID", worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimError::remote("spawn", e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SimError::remote("spawn", "renderer stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimError::remote("spawn", "renderer stdout not captured"))?;

        tracing::info!(
            worker_id,
            pid = ?child.id(),
            program = %self.command.program,
            "Renderer process spawned"
        );

        Ok(Box::new(StdioProcess {
            child,
            channel: Arc::new(Mutex::new(Channel {
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 1,
                closed: false,
            })),
        }))
    }
}

pub struct StdioProcess {
    child: Child,
    channel: Arc<Mutex<Channel>>,
}

#[async_trait]
impl RendererProcess for StdioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn open_session(&mut self) -> Result<Box<dyn RenderSession>> {
        let result = self.channel.lock().await.call("openSession", json!({})).await?;
        let session = result
            .get("session")
            .and_then(Value::as_u64)
            .ok_or_else(|| SimError::remote("openSession", "response has no session id"))?;
        Ok(Box::new(StdioSession {
            channel: self.channel.clone(),
            session,
        }))
    }

    async fn terminate(&mut self) -> Result<()> {
        let channel = self.channel.clone();
        let polite = async move { channel.lock().await.call("shutdown", json!({})).await };
        if tokio::time::timeout(TERMINATE_GRACE, polite).await.is_err() {
            tracing::debug!(pid = ?self.child.id(), "Renderer ignored shutdown request");
        }
        self.child
            .kill()
            .await
            .map_err(|e| SimError::remote("terminate", e))
    }
}

/// One session multiplexed over its process' channel.
pub struct StdioSession {
    channel: Arc<Mutex<Channel>>,
    session: u64,
}

impl StdioSession {
    async fn call(&self, method: &str, mut params: Value) -> Result<Value> {
        if let Value::Object(map) = &mut params {
            map.insert("session".to_string(), json!(self.session));
        }
        self.channel.lock().await.call(method, params).await
    }
}

#[async_trait]
impl RenderSession for StdioSession {
    async fn load_preset(&mut self, preset: &str) -> Result<()> {
        self.call("loadPreset", json!({ "preset": preset })).await?;
        Ok(())
    }

    async fn await_ready(&mut self, deadline: Duration) -> Result<()> {
        let params = json!({ "deadline_ms": deadline.as_millis() as u64 });
        match tokio::time::timeout(deadline, self.call("awaitReady", params)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(SimError::LoadTimeout(deadline)),
        }
    }

    async fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.call("setSeed", json!({ "seed": seed })).await?;
        Ok(())
    }

    async fn set_option(&mut self, key: &str, value: &Value) -> Result<()> {
        self.call("setOption", json!({ "key": key, "value": value }))
            .await?;
        Ok(())
    }

    async fn recompute_derived_parameters(&mut self) -> Result<()> {
        self.call("recomputeDerivedParameters", json!({})).await?;
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.call("reset", json!({})).await?;
        Ok(())
    }

    async fn step(&mut self, steps: u32) -> Result<()> {
        self.call("step", json!({ "steps": steps })).await?;
        Ok(())
    }

    async fn render(&mut self) -> Result<()> {
        self.call("render", json!({})).await?;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>> {
        let result = self.call("captureFrame", json!({})).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| SimError::remote("captureFrame", "expected a base64 string"))?;
        decode_frame(encoded)
    }

    async fn get_simulation_time(&mut self) -> Result<f64> {
        self.call("getSimulationTime", json!({}))
            .await?
            .as_f64()
            .ok_or_else(|| SimError::remote("getSimulationTime", "expected a number"))
    }

    async fn get_options_snapshot(&mut self) -> Result<Value> {
        self.call("getOptionsSnapshot", json!({})).await
    }

    async fn apply_localized_edit(&mut self, edit: &LocalizedEdit) -> Result<()> {
        self.call("applyLocalizedEdit", serde_json::to_value(edit)?)
            .await?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.call("clear", json!({})).await?;
        Ok(())
    }
}

/// Decode a captured frame sent as plain base64 or as a `data:` URI.
fn decode_frame(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| SimError::remote("captureFrame", e))
}
