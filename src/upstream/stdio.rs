//! stdio upstream transport
//!
//! Spawns the configured command and speaks newline-delimited JSON-RPC over
//! its standard input/output streams. stderr is drained to the log sink even
//! while the transport is blocked on stdin. The framing decoder is
//! line-buffered and tolerates a final frame with no trailing newline.

use super::UpstreamEvent;
use super::transport::{
    RequestRouter, UpstreamTransport, await_response, encode_frame, initialize_params,
};
use crate::constants;
use crate::error::TransportError;
use crate::model::RequestContext;
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, methods};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    router: Arc<RequestRouter>,
    closed: CancellationToken,
}

impl StdioTransport {
    /// Spawn the subprocess and start the reader tasks.
    ///
    /// The child environment is the hub's own environment with the
    /// configured `env` entries layered on top (values already expanded by
    /// the settings store).
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        events: broadcast::Sender<UpstreamEvent>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Subprocess(format!("failed to spawn '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Subprocess("failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Subprocess("failed to open stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Subprocess("failed to open stderr".to_string()))?;

        let router = RequestRouter::new(name.to_string(), events);
        let closed = CancellationToken::new();

        // stdout reader: LF-delimited frames; the final partial line before
        // EOF is still delivered, so a frame without a trailing newline
        // parses.
        {
            let router = router.clone();
            let closed = closed.clone();
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcMessage>(line) {
                                Ok(message) => router.route(message),
                                Err(e) => tracing::warn!(
                                    "upstream '{}': unparseable frame: {}",
                                    server,
                                    e
                                ),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("upstream '{}': stdout read error: {}", server, e);
                            break;
                        }
                    }
                }
                router.fail_all("subprocess exited");
                closed.cancel();
            });
        }

        // stderr drain, alive for the whole subprocess lifetime.
        {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            router,
            closed,
        })
    }

    async fn write_frame(&self, frame: String) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| TransportError::Subprocess(format!("stdin write failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Subprocess(format!("stdin flush failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl UpstreamTransport for StdioTransport {
    async fn initialize(&self) -> Result<Value> {
        let result = self
            .request(
                methods::INITIALIZE,
                initialize_params(),
                None,
                CancellationToken::new(),
            )
            .await?;
        self.notify(methods::NOTIFICATION_INITIALIZED, Value::Null)
            .await?;
        Ok(result)
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        _ctx: Option<&RequestContext>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let (id, rx) = self.router.register();
        let request = JsonRpcRequest::new(id.clone(), method, Some(params));
        let frame = encode_frame(&request)?;
        if let Err(e) = self.write_frame(frame).await {
            self.router.discard(&id);
            return Err(e);
        }
        let result = await_response(rx, &cancel, &self.closed).await;
        if matches!(result, Err(McpHubError::Cancelled)) {
            self.router.discard(&id);
        }
        result
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let params = if params.is_null() { None } else { Some(params) };
        let notification = JsonRpcNotification::new(method, params);
        let mut frame = serde_json::to_string(&notification)?;
        frame.push('\n');
        self.write_frame(frame).await
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn shutdown(&self) {
        self.closed.cancel();
        self.router.fail_all("transport shut down");

        let mut child = self.child.lock().await;

        // Ask nicely first, then escalate.
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            match tokio::time::timeout(constants::SUBPROCESS_KILL_GRACE, child.wait()).await {
                Ok(_) => return,
                Err(_) => {
                    tracing::warn!(
                        "upstream '{}': subprocess ignored SIGTERM, killing",
                        self.router.server()
                    );
                }
            }
        }

        if let Err(e) = child.start_kill() {
            tracing::debug!(
                "upstream '{}': kill failed (already exited?): {}",
                self.router.server(),
                e
            );
        }
        let _ = child.wait().await;
    }
}
