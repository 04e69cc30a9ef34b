use crate::args::{Cli, Command, ConnsCommand, ExecArgs, ServeArgs};
use crate::commands::{self, StatementOutcome};
use crate::output;
use clap::Parser;
use dbnet_connection::{ConnectionRegistry, DbnetHome, DriverRegistry};
use dbnet_core::{ConnectionConfig, Value};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use tempfile::TempDir;

fn sqlite_registry(dir: &TempDir) -> ConnectionRegistry {
    let registry = ConnectionRegistry::new(DriverRegistry::with_defaults());
    registry.insert(
        ConnectionConfig::new("sqlite", "LOCAL")
            .with_param("path", dir.path().join("local.db").to_string_lossy().to_string()),
    );
    registry
}

#[test]
fn test_parse_exec_with_query() {
    let cli = Cli::try_parse_from(["dbnet", "exec", "local", "--query", "select 1"]).unwrap();
    let Command::Exec(args) = cli.command else {
        panic!("expected exec");
    };
    assert_eq!(args.conn, "local");
    assert_eq!(args.query.as_deref(), Some("select 1"));
    assert!(args.file.is_none());
}

#[test]
fn test_parse_rejects_query_and_file_together() {
    let parsed = Cli::try_parse_from(["dbnet", "exec", "local", "-q", "select 1", "-f", "a.sql"]);
    assert!(parsed.is_err());
}

#[test]
fn test_parse_serve_and_conns() {
    let cli = Cli::try_parse_from(["dbnet", "-v", "serve", "--port", "6000"]).unwrap();
    assert!(cli.verbose);
    let Command::Serve(args) = cli.command else {
        panic!("expected serve");
    };
    assert_eq!(args.port, Some(6000));
    assert!(args.host.is_none());

    let cli = Cli::try_parse_from(["dbnet", "conns", "test", "warehouse"]).unwrap();
    assert!(matches!(
        cli.command,
        Command::Conns { command: ConnsCommand::Test { name } } if name == "warehouse"
    ));
}

#[test]
fn test_flags_override_server_environment() {
    let config = commands::server_config(ServeArgs {
        host: Some("127.0.0.1".into()),
        port: Some(9000),
    })
    .unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 9000);
}

#[test]
fn test_exec_sql_sources() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("script.sql");
    std::fs::write(&path, "select 2;").unwrap();

    let from_file = ExecArgs {
        conn: "LOCAL".into(),
        query: None,
        file: Some(path),
    };
    assert_eq!(commands::exec_sql(&from_file).unwrap(), "select 2;");

    let missing = ExecArgs {
        conn: "LOCAL".into(),
        query: None,
        file: Some(PathBuf::from("/nonexistent/script.sql")),
    };
    assert_eq!(
        commands::exec_sql(&missing).unwrap_err().to_string(),
        "/nonexistent/script.sql does not exist"
    );

    let neither = ExecArgs {
        conn: "LOCAL".into(),
        query: None,
        file: None,
    };
    assert_eq!(
        commands::exec_sql(&neither).unwrap_err().to_string(),
        "Must specify query or file (with --query or --file)"
    );
}

#[tokio::test]
async fn test_run_sql_executes_each_statement() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir);

    let outcomes = commands::run_sql(
        &registry,
        "local",
        "CREATE TABLE t (id INTEGER, name TEXT);\n\
         INSERT INTO t VALUES (1, 'a'), (2, 'b');\n\
         SELECT id, name FROM t ORDER BY id;",
    )
    .await
    .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[1], StatementOutcome::Affected(2));
    assert_eq!(
        outcomes[2],
        StatementOutcome::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![Value::Int64(1), Value::String("a".into())],
                vec![Value::Int64(2), Value::String("b".into())],
            ],
            truncated: false,
        }
    );
}

#[tokio::test]
async fn test_run_sql_truncates_long_results() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir);

    let outcomes = commands::run_sql(
        &registry,
        "LOCAL",
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 250) SELECT x FROM c",
    )
    .await
    .unwrap();

    let StatementOutcome::Rows { rows, truncated, .. } = &outcomes[0] else {
        panic!("expected rows");
    };
    assert_eq!(rows.len(), commands::PRINT_LIMIT);
    assert!(truncated);
    assert!(output::render_outcome(&outcomes[0]).ends_with("(showing first 100 rows)"));
}

#[tokio::test]
async fn test_run_sql_stops_at_first_failure() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir);

    let err = commands::run_sql(&registry, "LOCAL", "SELECT 1; SELECT * FROM missing; SELECT 3")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "statement 2 failed");
    assert!(format!("{:#}", err).contains("no such table"));

    let err = commands::run_sql(&registry, "NOPE", "SELECT 1").await.unwrap_err();
    assert_eq!(err.to_string(), "could not find conn NOPE");
}

#[test]
fn test_load_registry_reads_home_env_file() {
    let dir = TempDir::new().unwrap();
    let home = DbnetHome::at(dir.path());
    home.ensure().unwrap();
    std::fs::write(
        home.env_file(),
        format!(
            "connections:\n  LOCAL:\n    type: sqlite\n    path: {}\n    dbt: true\n",
            dir.path().join("local.db").display()
        ),
    )
    .unwrap();

    let registry = commands::load_registry(&home).unwrap();
    assert!(registry.list().contains(&"LOCAL".to_string()));

    let entries: Vec<ConnectionConfig> = registry
        .entries()
        .into_iter()
        .filter(|e| e.name == "LOCAL")
        .collect();
    let rendered = output::connections_table(&entries).to_string();
    assert!(rendered.contains("LOCAL"));
    assert!(rendered.contains("sqlite"));
    assert!(rendered.contains("yes"));
}

#[test]
fn test_affected_rows_rendering() {
    assert_eq!(
        output::render_outcome(&StatementOutcome::Affected(3)),
        "3 rows affected"
    );
}
