//! Terminal tables

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use dbnet_core::{ConnectionConfig, Value};

use crate::commands::StatementOutcome;

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn connections_table(entries: &[ConnectionConfig]) -> Table {
    let mut table = table();
    table.set_header(vec!["Name", "Type", "Database", "dbt"]);
    for entry in entries {
        table.add_row(vec![
            entry.name.clone(),
            entry.driver.clone(),
            entry.database().unwrap_or_default(),
            if entry.get_bool("dbt") { "yes" } else { "" }.to_string(),
        ]);
    }
    table
}

pub fn rows_table(columns: &[String], rows: &[Vec<Value>]) -> Table {
    let mut table = table();
    table.set_header(columns.to_vec());
    for row in rows {
        table.add_row(row.iter().map(Value::to_string).collect::<Vec<_>>());
    }
    table
}

/// Text printed for one executed statement
pub fn render_outcome(outcome: &StatementOutcome) -> String {
    match outcome {
        StatementOutcome::Affected(n) => format!("{} rows affected", n),
        StatementOutcome::Rows {
            columns,
            rows,
            truncated,
        } => {
            let mut text = rows_table(columns, rows).to_string();
            if *truncated {
                text.push_str(&format!("\n(showing first {} rows)", rows.len()));
            }
            text
        }
    }
}
