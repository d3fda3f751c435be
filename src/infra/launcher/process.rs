//! Launcher that runs an agent CLI as a child process.
//!
//! Prompts are written to stdin one line at a time and responses read from
//! stdout. With [`PromptFormat::StreamJson`] the prompt is wrapped in a
//! `user` message and a turn ends at the first `{"type":"result"}` line,
//! which matches agent CLIs started with stream-json input and output.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::{AgentSession, LaunchError, SessionLauncher};

/// How prompts and responses are framed on the process pipes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptFormat {
    /// One raw line in, one raw line out.
    #[default]
    PlainLine,
    /// JSON `user` message in; JSON lines out until a `result` line.
    StreamJson,
}

/// Configuration for [`ProcessLauncher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessLauncherConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed on every launch.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Flag used to pass a generated session id (e.g. `--session-id`).
    #[serde(default)]
    pub session_id_flag: Option<String>,
    /// Framing of prompts and responses.
    #[serde(default)]
    pub format: PromptFormat,
    /// Grace period for the child to exit after being killed.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
}

const fn default_terminate_timeout_ms() -> u64 {
    5000
}

impl ProcessLauncherConfig {
    /// Plain-line launcher for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            env: Vec::new(),
            session_id_flag: None,
            format: PromptFormat::PlainLine,
            terminate_timeout_ms: default_terminate_timeout_ms(),
        }
    }

    /// Stream-json agent CLI, e.g. `claude`.
    pub fn agent_cli(program: impl Into<PathBuf>) -> Self {
        Self {
            args: [
                "--print",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            session_id_flag: Some("--session-id".into()),
            format: PromptFormat::StreamJson,
            ..Self::new(program)
        }
    }
}

/// Starts agent sessions as child processes.
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
}

impl ProcessLauncher {
    /// Create a launcher.
    pub const fn new(config: ProcessLauncherConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Arc<dyn AgentSession>, LaunchError> {
        let external_id = Uuid::new_v4().to_string();
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(flag) = &self.config.session_id_flag {
            cmd.arg(flag).arg(&external_id);
        }
        if let Some(dir) = &self.config.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            LaunchError::Spawn(format!("{}: {e}", self.config.program.display()))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LaunchError::Spawn("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Spawn("child stdout unavailable".into()))?;
        let pid = child.id();
        tracing::debug!(pid = ?pid, program = %self.config.program.display(), "agent process spawned");

        Ok(Arc::new(ProcessSession {
            external_id,
            pid,
            format: self.config.format,
            terminate_timeout: Duration::from_millis(self.config.terminate_timeout_ms),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
        }))
    }
}

struct ProcessSession {
    external_id: String,
    pid: Option<u32>,
    format: PromptFormat,
    terminate_timeout: Duration,
    child: Mutex<Option<Child>>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<Lines<BufReader<ChildStdout>>>,
}

impl ProcessSession {
    fn encode(&self, prompt: &str) -> String {
        match self.format {
            PromptFormat::PlainLine => prompt.replace('\n', " "),
            PromptFormat::StreamJson => json!({
                "type": "user",
                "message": { "role": "user", "content": prompt },
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl AgentSession for ProcessSession {
    fn external_id(&self) -> Option<String> {
        Some(self.external_id.clone())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn send(&self, prompt: &str) -> Result<(), LaunchError> {
        let line = self.encode(prompt);
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn read_output(&self) -> Result<String, LaunchError> {
        let mut stdout = self.stdout.lock().await;
        match self.format {
            PromptFormat::PlainLine => stdout.next_line().await?.ok_or(LaunchError::Closed),
            PromptFormat::StreamJson => {
                let mut transcript = Vec::new();
                while let Some(line) = stdout.next_line().await? {
                    let Ok(value) = serde_json::from_str::<Value>(&line) else {
                        transcript.push(line);
                        continue;
                    };
                    if value.get("type").and_then(Value::as_str) == Some("result") {
                        if value.get("is_error").and_then(Value::as_bool) == Some(true) {
                            let detail = value
                                .get("result")
                                .and_then(Value::as_str)
                                .unwrap_or("agent reported an error");
                            return Err(LaunchError::Remote(detail.to_owned()));
                        }
                        return Ok(value
                            .get("result")
                            .and_then(Value::as_str)
                            .map_or_else(|| transcript.join("\n"), str::to_owned));
                    }
                    transcript.push(line);
                }
                Err(LaunchError::Closed)
            }
        }
    }

    async fn terminate(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "kill failed; process likely exited");
        }
        match tokio::time::timeout(self.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(pid = ?self.pid, %status, "agent process exited"),
            Ok(Err(e)) => tracing::warn!(pid = ?self.pid, error = %e, "waiting for agent process failed"),
            Err(_) => tracing::warn!(pid = ?self.pid, "agent process did not exit in time"),
        }
    }
}
