use async_trait::async_trait;
use dbnet_core::{CancellationToken, DbnetError, DbtKey, Result, SqlCompiler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;

use crate::{DbtBrokerConfig, Launcher, ProcessLauncher, RpcRequest, RpcResponse};

type Servers = Arc<Mutex<HashMap<DbtKey, Arc<DbtServer>>>>;

/// One launch lock per key
type LaunchLocks = Mutex<HashMap<DbtKey, Arc<tokio::sync::Mutex<()>>>>;

/// A running helper process
struct DbtServer {
    key: DbtKey,
    port: u16,
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
    last_used: Mutex<Instant>,
    closed: CancellationToken,
}

impl DbtServer {
    fn new(key: DbtKey, port: u16, child: Child) -> Self {
        Self {
            key,
            port,
            pid: child.id(),
            child: tokio::sync::Mutex::new(child),
            last_used: Mutex::new(Instant::now()),
            closed: CancellationToken::new(),
        }
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}/jsonrpc", self.port)
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn stop(&self) {
        self.closed.cancel();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(key = %self.key, error = %e, "could not kill dbt server");
        }
    }
}

/// Registry of helper processes keyed by (project dir, profile, target)
pub struct DbtBroker {
    config: DbtBrokerConfig,
    launcher: Arc<dyn Launcher>,
    client: reqwest::Client,
    servers: Servers,
    /// Serializes launches per key so a key is never started twice while
    /// other keys launch independently
    launching: LaunchLocks,
}

impl DbtBroker {
    pub fn new(config: DbtBrokerConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(config.program.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: DbtBrokerConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            client: reqwest::Client::new(),
            servers: Arc::new(Mutex::new(HashMap::new())),
            launching: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DbtBrokerConfig {
        &self.config
    }

    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }

    /// Process id of the helper serving `key`, if one is registered
    pub fn pid(&self, key: &DbtKey) -> Option<u32> {
        self.servers.lock().get(key).and_then(|s| s.pid)
    }

    /// Port of the helper for `key`, launching and probing it first if needed
    pub async fn get_or_launch(&self, key: &DbtKey) -> Result<u16> {
        Ok(self.server(key).await?.port)
    }

    /// Forward a JSON-RPC request to the helper for `key`.
    ///
    /// A transport failure discards the helper so the next call relaunches it.
    #[tracing::instrument(skip(self, request), fields(key = %key, method = %request.method))]
    pub async fn submit(&self, key: &DbtKey, request: RpcRequest) -> Result<RpcResponse> {
        let server = self.server(key).await?;
        server.touch();

        match self.call(&server, &request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!(error = %e, "dbt request failed, discarding server");
                self.evict(&server);
                server.stop().await;
                Err(e)
            }
        }
    }

    /// Ask the helper for `key` to reload its project (SIGHUP)
    pub fn refresh(&self, key: &DbtKey) -> Result<()> {
        let server = self
            .servers
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DbnetError::NotFound(format!("no dbt server running for {}", key)))?;
        server.touch();
        signal_reload(server.pid)?;
        tracing::debug!(key = %key, "dbt server refreshed");
        Ok(())
    }

    /// Stop every helper
    pub async fn shutdown(&self) {
        let all: Vec<Arc<DbtServer>> = self.servers.lock().drain().map(|(_, s)| s).collect();
        for server in all {
            tracing::debug!(key = %server.key, "stopping dbt server");
            server.stop().await;
        }
    }

    async fn server(&self, key: &DbtKey) -> Result<Arc<DbtServer>> {
        if let Some(server) = self.running(key).await {
            return Ok(server);
        }

        let lock = Arc::clone(self.launching.lock().entry(key.clone()).or_default());
        let _launching = lock.lock().await;
        if let Some(server) = self.running(key).await {
            return Ok(server);
        }

        let port = free_port()?;
        let child = self.launcher.launch(key, port).await?;
        let server = Arc::new(DbtServer::new(key.clone(), port, child));
        if let Err(e) = self.probe(&server).await {
            server.stop().await;
            return Err(e);
        }

        self.servers.lock().insert(key.clone(), Arc::clone(&server));
        tokio::spawn(watch_idle(
            Arc::clone(&server),
            Arc::clone(&self.servers),
            self.config.idle_timeout,
        ));
        tracing::info!(key = %key, port, pid = ?server.pid, "dbt server started");
        Ok(server)
    }

    /// The registered helper for `key` if its process is still alive
    async fn running(&self, key: &DbtKey) -> Option<Arc<DbtServer>> {
        let server = self.servers.lock().get(key).cloned()?;
        if server.is_running().await {
            return Some(server);
        }
        tracing::warn!(key = %key, "dbt server exited, relaunching");
        self.evict(&server);
        server.stop().await;
        None
    }

    fn evict(&self, server: &Arc<DbtServer>) {
        evict(&self.servers, server);
    }

    async fn probe(&self, server: &DbtServer) -> Result<()> {
        let attempts = self.config.probe_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.probe_backoff.calculate_delay(attempt - 1)).await;
            }
            match self.call(server, &RpcRequest::status(format!("probe-{}", attempt))).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "dbt server not ready");
                    last_error = e.to_string();
                }
            }
            if !server.is_running().await {
                last_error = "process exited during startup".to_string();
                break;
            }
        }

        Err(DbnetError::Subprocess(format!(
            "dbt server for {} did not respond after {} attempts: {}",
            server.key, attempts, last_error
        )))
    }

    async fn call(&self, server: &DbtServer, request: &RpcRequest) -> Result<RpcResponse> {
        let response = self
            .client
            .post(server.url())
            .timeout(self.config.request_timeout)
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                DbnetError::Subprocess(format!("dbt request '{}' failed: {}", request.method, e))
            })?;

        response.json::<RpcResponse>().await.map_err(|e| {
            DbnetError::Subprocess(format!("invalid dbt response to '{}': {}", request.method, e))
        })
    }
}

#[async_trait]
impl SqlCompiler for DbtBroker {
    async fn compile(
        &self,
        key: &DbtKey,
        name: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let response = tokio::select! {
            response = self.submit(key, RpcRequest::compile_sql(name, sql)) => response?,
            _ = cancel.cancelled() => {
                tracing::debug!(key = %key, name, "dbt compile cancelled");
                return Err(DbnetError::Cancelled);
            }
        };
        if let Some(message) = response.error_message() {
            return Err(DbnetError::Subprocess(format!(
                "dbt could not compile {}: {}",
                name, message
            )));
        }
        response
            .compiled_sql()
            .map(str::to_string)
            .ok_or_else(|| DbnetError::Subprocess(format!("dbt returned no compiled sql for {}", name)))
    }
}

/// Stop a helper once it has been idle for `idle`; every use pushes the
/// deadline back
async fn watch_idle(server: Arc<DbtServer>, servers: Servers, idle: Duration) {
    loop {
        let deadline = tokio::time::Instant::from_std(server.last_used() + idle);
        tokio::select! {
            _ = server.closed.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        if server.last_used().elapsed() < idle {
            continue;
        }

        evict(&servers, &server);
        tracing::info!(key = %server.key, "stopping idle dbt server");
        server.stop().await;
        return;
    }
}

fn evict(servers: &Servers, server: &Arc<DbtServer>) {
    let mut servers = servers.lock();
    if servers.get(&server.key).is_some_and(|s| Arc::ptr_eq(s, server)) {
        servers.remove(&server.key);
    }
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(unix)]
fn signal_reload(pid: Option<u32>) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = pid
        .and_then(|p| i32::try_from(p).ok())
        .ok_or_else(|| DbnetError::Subprocess("dbt server has no process id".into()))?;
    signal::kill(Pid::from_raw(pid), Signal::SIGHUP)
        .map_err(|e| DbnetError::Subprocess(format!("could not signal dbt server: {}", e)))
}

#[cfg(not(unix))]
fn signal_reload(_pid: Option<u32>) -> Result<()> {
    Err(DbnetError::Subprocess(
        "reloading a dbt server needs unix signals".into(),
    ))
}
