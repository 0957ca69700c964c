//! PostgreSQL access.
//!
//! Wraps a sqlx pool behind [`SqlExecutor`] so the pipeline can run model
//! SQL without knowing about sqlx, and builds the schema context the
//! translator hands to the model.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, PgPool, Row, TypeInfo};
use thiserror::Error;

use common::config::{AppConfig, DatabaseSettings};
use common::errors::{AppError, AppResult};
use common::models::RawResult;

/// Fractional digits of the `money` type under the default locale.
const MONEY_SCALE: u32 = 2;

/// Failure of one statement.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The database rejected the statement. The text is kept so it can be
    /// repaired and run again.
    #[error("{message}\n[SQL: {sql}]")]
    Statement { sql: String, message: String },

    /// Pool, network or decoding trouble unrelated to the statement text.
    #[error("database driver error: {0}")]
    Driver(String),
}

impl From<ExecutionError> for AppError {
    fn from(err: ExecutionError) -> Self {
        AppError::DatabaseQuery(err.to_string())
    }
}

/// Runs SQL text and returns its rows.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn run(&self, sql: &str) -> Result<RawResult, ExecutionError>;
}

/// PostgreSQL pool.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connects a pool sized from the server configuration.
    pub async fn connect(settings: &DatabaseSettings, config: &AppConfig) -> AppResult<Self> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        tracing::info!(host = %settings.host, database = %settings.name, "Database pool connected");
        Ok(Self { pool })
    }

    /// Connectivity check run once at startup.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;
        Ok(())
    }

    /// Describes every table in the `public` schema as `CREATE TABLE` text,
    /// followed by up to `sample_rows` example rows.
    pub async fn table_info(&self, sample_rows: usize) -> AppResult<String> {
        let columns: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT table_name::text, column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema = 'public'
             ORDER BY table_name, ordinal_position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseQuery(format!("Failed to read schema: {}", e)))?;

        let tables = group_columns(columns);
        let mut sections = Vec::with_capacity(tables.len());
        for (table, columns) in &tables {
            let mut section = render_create_table(table, columns);
            if sample_rows > 0 {
                let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table), sample_rows);
                match self.run(&sql).await {
                    Ok(rows) => section.push_str(&format!(
                        "\n\n/*\n{} rows from {} table:\n{}\n*/",
                        sample_rows, table, rows
                    )),
                    Err(e) => tracing::warn!(table = %table, error = %e, "Sample rows unavailable"),
                }
            }
            sections.push(section);
        }

        tracing::info!(tables = tables.len(), "Schema context loaded");
        Ok(sections.join("\n\n"))
    }
}

#[async_trait]
impl SqlExecutor for PgDatabase {
    async fn run(&self, sql: &str) -> Result<RawResult, ExecutionError> {
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => ExecutionError::Statement {
                    sql: sql.to_string(),
                    message: db.message().to_string(),
                },
                other => ExecutionError::Driver(other.to_string()),
            })?;

        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExecutionError::Driver(e.to_string()))?;

        Ok(RawResult::from_rows(decoded))
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.columns().len())
        .map(|idx| decode_cell(row, idx))
        .collect()
}

/// How a column is decoded, chosen from its Postgres type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Money,
    Date,
    Time,
    Timestamp,
    Timestamptz,
    Interval,
    Uuid,
    Json,
    BoolArray,
    Int2Array,
    Int4Array,
    Int8Array,
    Float4Array,
    Float8Array,
    NumericArray,
    TextArray,
    /// TEXT, VARCHAR, BPCHAR, NAME; anything else must decode as text too.
    Text,
}

fn cell_kind(type_name: &str) -> CellKind {
    match type_name.to_ascii_uppercase().as_str() {
        "BOOL" => CellKind::Bool,
        "INT2" => CellKind::Int2,
        "INT4" => CellKind::Int4,
        "INT8" => CellKind::Int8,
        "FLOAT4" => CellKind::Float4,
        "FLOAT8" => CellKind::Float8,
        "NUMERIC" => CellKind::Numeric,
        "MONEY" => CellKind::Money,
        "DATE" => CellKind::Date,
        "TIME" => CellKind::Time,
        "TIMESTAMP" => CellKind::Timestamp,
        "TIMESTAMPTZ" => CellKind::Timestamptz,
        "INTERVAL" => CellKind::Interval,
        "UUID" => CellKind::Uuid,
        "JSON" | "JSONB" => CellKind::Json,
        "_BOOL" => CellKind::BoolArray,
        "_INT2" => CellKind::Int2Array,
        "_INT4" => CellKind::Int4Array,
        "_INT8" => CellKind::Int8Array,
        "_FLOAT4" => CellKind::Float4Array,
        "_FLOAT8" => CellKind::Float8Array,
        "_NUMERIC" => CellKind::NumericArray,
        "_TEXT" | "_VARCHAR" | "_BPCHAR" | "_NAME" => CellKind::TextArray,
        _ => CellKind::Text,
    }
}

/// Maps one Postgres value onto JSON by its column type. A value that
/// cannot be decoded is an error, never a silent NULL.
fn decode_cell(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
    let value = match cell_kind(row.column(idx).type_info().name()) {
        CellKind::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        CellKind::Int2 => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        CellKind::Int4 => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        CellKind::Int8 => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        CellKind::Float4 => row.try_get::<Option<f32>, _>(idx)?.map(|v| Value::from(v as f64)),
        CellKind::Float8 => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        CellKind::Numeric => row.try_get::<Option<Decimal>, _>(idx)?.map(decimal_to_json),
        CellKind::Money => row
            .try_get::<Option<PgMoney>, _>(idx)?
            .map(|m| decimal_to_json(m.to_decimal(MONEY_SCALE))),
        CellKind::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::String(d.to_string())),
        CellKind::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| Value::String(t.to_string())),
        CellKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|t| Value::String(t.to_string())),
        CellKind::Timestamptz => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|t| Value::String(t.to_rfc3339())),
        CellKind::Interval => row
            .try_get::<Option<PgInterval>, _>(idx)?
            .map(|i| Value::String(interval_to_string(&i))),
        CellKind::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|u| Value::String(u.to_string())),
        CellKind::Json => row.try_get::<Option<Value>, _>(idx)?,
        CellKind::BoolArray => row
            .try_get::<Option<Vec<Option<bool>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::from)),
        CellKind::Int2Array => row
            .try_get::<Option<Vec<Option<i16>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::from)),
        CellKind::Int4Array => row
            .try_get::<Option<Vec<Option<i32>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::from)),
        CellKind::Int8Array => row
            .try_get::<Option<Vec<Option<i64>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::from)),
        CellKind::Float4Array => row
            .try_get::<Option<Vec<Option<f32>>>, _>(idx)?
            .map(|v| list_to_json(v, |f| Value::from(f as f64))),
        CellKind::Float8Array => row
            .try_get::<Option<Vec<Option<f64>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::from)),
        CellKind::NumericArray => row
            .try_get::<Option<Vec<Option<Decimal>>>, _>(idx)?
            .map(|v| list_to_json(v, decimal_to_json)),
        CellKind::TextArray => row
            .try_get::<Option<Vec<Option<String>>>, _>(idx)?
            .map(|v| list_to_json(v, Value::String)),
        CellKind::Text => row.try_get::<Option<String>, _>(idx)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn list_to_json<T>(items: Vec<Option<T>>, convert: impl Fn(T) -> Value) -> Value {
    Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(Value::Null, &convert))
            .collect(),
    )
}

/// Renders an interval the way `psql` prints it, e.g.
/// `1 year 2 mons 3 days 04:05:06`.
fn interval_to_string(interval: &PgInterval) -> String {
    fn unit(n: i32, name: &str) -> String {
        let suffix = if n.abs() == 1 { "" } else { "s" };
        format!("{} {}{}", n, name, suffix)
    }

    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(unit(years, "year"));
    }
    if months != 0 {
        parts.push(unit(months, "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days, "day"));
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let (secs, frac) = (micros / 1_000_000, micros % 1_000_000);
        let time = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
        parts.push(if frac == 0 { time } else { format!("{}.{:06}", time, frac) });
    }
    parts.join(" ")
}

fn decimal_to_json(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    text.parse::<Number>()
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

fn group_columns(columns: Vec<(String, String, String)>) -> Vec<(String, Vec<(String, String)>)> {
    let mut tables: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for (table, column, data_type) in columns {
        match tables.last_mut() {
            Some((name, cols)) if *name == table => cols.push((column, data_type)),
            _ => tables.push((table, vec![(column, data_type)])),
        }
    }
    tables
}

fn render_create_table(table: &str, columns: &[(String, String)]) -> String {
    let body = columns
        .iter()
        .map(|(name, data_type)| format!("\t{} {}", quote_ident(name), data_type.to_uppercase()))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", quote_ident(table), body)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
