//! SQLite metadata and analysis templates

use dbnet_core::TemplateCatalog;

const DATABASES: &str = "select name from pragma_database_list order by seq";

const SCHEMAS: &str = "select name as schema_name from pragma_database_list order by seq";

const TABLES: &str = r#"select name as table_name, 'false' as is_view
from "{schema}".sqlite_master
where type = 'table' and name not like 'sqlite_%'
union all
select name as table_name, 'true' as is_view
from "{schema}".sqlite_master
where type = 'view'
order by table_name"#;

const COLUMNS: &str = r#"select cid + 1 as position, name as column_name, type as data_type
from pragma_table_info('{table}', '{schema}')
order by cid"#;

const DDL_TABLE: &str = r#"select sql from "{schema}".sqlite_master where name = '{table}'"#;

const FIELD_STAT: &str = r#"select
  '{schema}' as schema_nm,
  '{table}' as table_nm,
  '{field}' as field,
  count(*) as tot_cnt,
  count("{field}") as f_cnt,
  count(*) - count("{field}") as f_null_cnt,
  count(distinct "{field}") as f_dstct_cnt,
  min(length("{field}")) as f_min_len,
  max(length("{field}")) as f_max_len
from "{schema}"."{table}""#;

const FIELD_STAT_DEEP: &str = r#"select
  '{schema}' as schema_nm,
  '{table}' as table_nm,
  '{field}' as field,
  count(*) as tot_cnt,
  count("{field}") as f_cnt,
  count(*) - count("{field}") as f_null_cnt,
  count(distinct "{field}") as f_dstct_cnt,
  min(length("{field}")) as f_min_len,
  max(length("{field}")) as f_max_len,
  cast(min("{field}") as text) as f_min,
  cast(max("{field}") as text) as f_max,
  sum(case when "{field}" = '' then 1 else 0 end) as f_blank_cnt
from "{schema}"."{table}""#;

const FIELD_DISTRO: &str = r#"select
  '{field}' as field,
  "{field}" as value,
  count(*) as cnt
from "{schema}"."{table}"
group by "{field}"
order by cnt desc"#;

const FIELD_CHAR_LEN: &str = r#"select
  '{field}' as field,
  length("{field}") as len,
  count(*) as cnt
from "{schema}"."{table}"
group by length("{field}")
order by len"#;

const TABLE_COUNT: &str = r#"select '{schema}' as schema_nm, '{table}' as table_nm, count(*) as cnt
from "{schema}"."{table}""#;

/// The catalog every [`crate::SqliteConnection`] carries
pub fn sqlite_templates() -> TemplateCatalog {
    TemplateCatalog::default()
        .with_metadata("databases", DATABASES)
        .with_metadata("schemas", SCHEMAS)
        .with_metadata("tables", TABLES)
        .with_metadata("columns", COLUMNS)
        .with_metadata("ddl_table", DDL_TABLE)
        .with_analysis("field_stat", FIELD_STAT)
        .with_analysis("field_stat_deep", FIELD_STAT_DEEP)
        .with_analysis("field_distro", FIELD_DISTRO)
        .with_analysis("field_char_len", FIELD_CHAR_LEN)
        .with_analysis("table_count", TABLE_COUNT)
}
