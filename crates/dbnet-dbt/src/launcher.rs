use async_trait::async_trait;
use dbnet_core::{DbnetError, DbtKey, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Starts a helper process listening on `port` for `key`
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, key: &DbtKey, port: u16) -> Result<Child>;
}

/// Runs `<program> serve --port <port> [--profile ..] [--target ..]` in the
/// project directory
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, key: &DbtKey, port: u16) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command.arg("serve").arg("--port").arg(port.to_string());
        if !key.profile.is_empty() {
            command.arg("--profile").arg(&key.profile);
        }
        if !key.target.is_empty() {
            command.arg("--target").arg(&key.target);
        }
        if !key.project_dir.as_os_str().is_empty() {
            command.current_dir(&key.project_dir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DbnetError::Subprocess(format!("could not launch {}: {}", self.program, e)))
    }
}
