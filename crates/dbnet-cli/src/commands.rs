//! Subcommand implementations

use anyhow::{Context, Result, bail};
use dbnet_connection::{ConnectionRegistry, DbnetHome, DriverRegistry};
use dbnet_core::{CancellationToken, Value};
use dbnet_dbt::{DbtBroker, DbtBrokerConfig};
use dbnet_jobs::{CursorCopyEngine, JobBroker, JobBrokerConfig};
use dbnet_query::{QueryBroker, QueryBrokerConfig, split_statements};
use dbnet_server::{AppState, ServerConfig};
use dbnet_store::Store;
use std::sync::Arc;
use std::time::Instant;

use crate::args::{ConnsCommand, ExecArgs, ServeArgs};
use crate::output;

/// Rows printed per result set by `exec`
pub(crate) const PRINT_LIMIT: usize = 100;

/// What one statement of an `exec` produced
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    Affected(u64),
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// More rows existed than were fetched
        truncated: bool,
    },
}

/// Connections from the home env file and the process environment
pub(crate) fn load_registry(home: &DbnetHome) -> Result<Arc<ConnectionRegistry>> {
    let registry = ConnectionRegistry::new(DriverRegistry::with_defaults())
        .with_env_file(home.env_file())
        .with_env_vars(true);
    let count = registry
        .reload()
        .with_context(|| format!("could not load connections from {}", home.env_file().display()))?;
    tracing::debug!(count, "connections loaded");
    Ok(Arc::new(registry))
}

/// `--host`/`--port` over `DBNET_HOST`/`DBNET_PORT`
pub(crate) fn server_config(args: ServeArgs) -> Result<ServerConfig> {
    let mut config = ServerConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

pub async fn serve(home: &DbnetHome, args: ServeArgs) -> Result<()> {
    let config = server_config(args)?;
    let registry = load_registry(home)?;
    if registry.list().is_empty() {
        tracing::warn!(
            env_file = %home.env_file().display(),
            "No connections have been defined. Declare them in the env file or as environment variables holding database URLs"
        );
        bail!("No connections have been defined");
    }

    let store = Store::open(home.store_path())?;
    let dbt = Arc::new(DbtBroker::new(DbtBrokerConfig::default()));
    let queries = Arc::new(
        QueryBroker::new(Arc::clone(&registry), store.clone(), QueryBrokerConfig::default())
            .with_compiler(dbt.clone()),
    );
    let engine = Arc::new(CursorCopyEngine::new(registry.drivers().clone()));
    let jobs = Arc::new(JobBroker::new(
        Arc::clone(&registry),
        store.clone(),
        engine,
        JobBrokerConfig::default(),
    ));
    let state = AppState::new(registry, store, Arc::clone(&queries), Arc::clone(&jobs))
        .with_dbt(Arc::clone(&dbt));

    let shutdown = CancellationToken::new();
    let sweeper = queries.spawn_sweeper(shutdown.clone());
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "could not listen for interrupts"),
        }
    });

    tracing::info!(host = %config.host, port = config.port, "Serving");
    let served = dbnet_server::serve(state, &config, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::debug!(error = %e, "sweeper ended abnormally");
    }
    queries.shutdown().await;
    jobs.shutdown();
    dbt.shutdown().await;

    served?;
    Ok(())
}

pub async fn conns(home: &DbnetHome, command: ConnsCommand) -> Result<()> {
    let registry = load_registry(home)?;
    match command {
        ConnsCommand::List => {
            println!("{}", output::connections_table(&registry.entries()));
        }
        ConnsCommand::Test { name } => {
            registry
                .test(&name)
                .await
                .with_context(|| format!("could not connect to {}", name))?;
            tracing::info!(conn = %name, "success!");
            println!("success!");
        }
    }
    Ok(())
}

/// SQL from `--query`, or read from `--file`
pub(crate) fn exec_sql(args: &ExecArgs) -> Result<String> {
    match (&args.query, &args.file) {
        (Some(query), _) => Ok(query.clone()),
        (None, Some(path)) => {
            if !path.exists() {
                bail!("{} does not exist", path.display());
            }
            std::fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))
        }
        (None, None) => bail!("Must specify query or file (with --query or --file)"),
    }
}

pub async fn exec(home: &DbnetHome, args: ExecArgs) -> Result<()> {
    let sql = exec_sql(&args)?;
    let registry = load_registry(home)?;

    tracing::info!(conn = %args.conn, "Executing...");
    let started = Instant::now();
    let outcomes = run_sql(&registry, &args.conn, &sql).await?;
    for outcome in &outcomes {
        println!("{}", output::render_outcome(outcome));
    }
    println!(
        "Successful! Duration: {:.2} seconds",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Run each statement of `sql` in order, stopping at the first failure
pub(crate) async fn run_sql(
    registry: &ConnectionRegistry,
    conn: &str,
    sql: &str,
) -> Result<Vec<StatementOutcome>> {
    let statements = split_statements(sql);
    if statements.is_empty() {
        bail!("no SQL statements to execute");
    }

    let connection = registry.resolve(conn, "").await?;
    let mut outcomes = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        tracing::debug!(index, sql_preview = %statement.chars().take(50).collect::<String>(), "executing statement");
        let mut cursor = connection
            .stream(statement, CancellationToken::new())
            .await
            .with_context(|| format!("statement {} failed", index + 1))?;

        if let Some(affected) = cursor.rows_affected() {
            outcomes.push(StatementOutcome::Affected(affected));
            continue;
        }

        let columns = cursor.columns().iter().map(|c| c.name.clone()).collect();
        let page = cursor
            .fetch(Some(PRINT_LIMIT))
            .await
            .with_context(|| format!("statement {} failed", index + 1))?;
        let truncated = !page.exhausted && cursor.next_row().await?.is_some();
        cursor.close();
        outcomes.push(StatementOutcome::Rows {
            columns,
            rows: page.rows,
            truncated,
        });
    }
    Ok(outcomes)
}
