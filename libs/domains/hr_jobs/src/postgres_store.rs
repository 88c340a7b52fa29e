//! PostgreSQL record store.
//!
//! Every record kind shares one table of JSONB documents keyed by
//! `(kind, id)`. Updates merge fields into the stored document, and aggregate
//! reads translate the [`AggregateQuery`] filter into JSONB predicates.

use crate::error::{HrJobError, HrJobResult};
use crate::store::{Aggregate, AggregateQuery, EntityKind, Measure, RecordStore};
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement,
};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS hr_records (
        seq BIGSERIAL,
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        data JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (kind, id)
    );
    CREATE INDEX IF NOT EXISTS hr_records_data_idx ON hr_records USING GIN (data);
"#;

const UPSERT: &str = r#"
    INSERT INTO hr_records (kind, id, data)
    VALUES ($1, $2, $3)
    ON CONFLICT (kind, id)
    DO UPDATE SET data = hr_records.data || EXCLUDED.data, updated_at = now()
"#;

fn db_error(e: DbErr) -> HrJobError {
    HrJobError::Store(format!("Database error: {}", e))
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

#[derive(Debug, FromQueryResult)]
struct AverageRow {
    average: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct RecordRow {
    data: Value,
}

/// Positional parameters for one statement.
#[derive(Default)]
struct Params {
    values: Vec<sea_orm::Value>,
}

impl Params {
    /// Bind a value and return its placeholder.
    fn bind(&mut self, value: impl Into<sea_orm::Value>) -> String {
        self.values.push(value.into());
        format!("${}", self.values.len())
    }
}

/// Translate an aggregate read into one SELECT over `hr_records`.
fn aggregate_statement(query: &AggregateQuery) -> Statement {
    let mut params = Params::default();
    let kind = params.bind(query.kind.to_string());
    let mut conditions = vec![format!("kind = {kind}")];

    let select = match &query.measure {
        Measure::Count => "COUNT(*) AS count".to_string(),
        Measure::Average(field) => {
            let field = params.bind(field.as_str());
            conditions.push(format!("jsonb_typeof(data -> {field}::text) = 'number'"));
            format!("AVG((data ->> {field}::text)::float8) AS average")
        }
        Measure::Records => "data".to_string(),
    };

    for (field, expected) in &query.filter.equals {
        let field = params.bind(field.as_str());
        let expected = params.bind(expected.clone());
        conditions.push(format!("data -> {field}::text = {expected}::jsonb"));
    }

    if let Some(range) = &query.filter.range {
        let field = params.bind(range.field.as_str());
        conditions.push(format!("data ->> {field}::text IS NOT NULL"));
        if let Some(start) = range.start {
            let start = params.bind(start);
            conditions.push(format!("(data ->> {field}::text)::timestamptz >= {start}"));
        }
        if let Some(end) = range.end {
            let end = params.bind(end);
            conditions.push(format!("(data ->> {field}::text)::timestamptz <= {end}"));
        }
    }

    let order = if matches!(query.measure, Measure::Records) {
        " ORDER BY seq"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {} FROM hr_records WHERE {}{}",
        select,
        conditions.join(" AND "),
        order
    );

    Statement::from_sql_and_values(DbBackend::Postgres, sql, params.values)
}

/// Record store backed by PostgreSQL through SeaORM.
#[derive(Clone)]
pub struct PostgresRecordStore {
    db: DatabaseConnection,
}

impl PostgresRecordStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect with a bounded pool and create the table when missing.
    pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> HrJobResult<Self> {
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(connect_timeout)
            .acquire_timeout(connect_timeout)
            .sqlx_logging(false);

        let db = Database::connect(opt).await.map_err(db_error)?;
        let store = Self::new(db);
        store.ensure_schema().await?;

        info!("Successfully connected to PostgreSQL record store");
        Ok(store)
    }

    /// Create `hr_records` and its index if they do not exist.
    pub async fn ensure_schema(&self) -> HrJobResult<()> {
        self.db.execute_unprepared(SCHEMA).await.map_err(db_error)?;
        Ok(())
    }

    /// Store a whole record, an object with a string `"id"`.
    pub async fn insert(&self, kind: EntityKind, record: Value) -> HrJobResult<()> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HrJobError::Store(format!("{} record has no string id", kind)))?;
        self.upsert(kind, &id, record).await
    }

    async fn upsert(&self, kind: EntityKind, id: &str, data: Value) -> HrJobResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT,
            [kind.to_string().into(), id.into(), data.into()],
        );
        self.db.execute_raw(stmt).await.map_err(db_error)?;
        Ok(())
    }

    /// Current document of one entity.
    pub async fn entity(&self, kind: EntityKind, id: &str) -> HrJobResult<Option<Map<String, Value>>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT data FROM hr_records WHERE kind = $1 AND id = $2",
            [kind.to_string().into(), id.into()],
        );

        let row = RecordRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_error)?;

        Ok(row.and_then(|r| match r.data {
            Value::Object(record) => Some(record),
            _ => None,
        }))
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn update_entity(&self, kind: EntityKind, id: &str, fields: Map<String, Value>) -> HrJobResult<()> {
        let mut data = fields;
        data.insert("id".to_string(), Value::String(id.to_string()));
        self.upsert(kind, id, Value::Object(data)).await?;

        debug!(kind = %kind, id = %id, "Entity updated");
        Ok(())
    }

    async fn read_aggregate(&self, query: AggregateQuery) -> HrJobResult<Aggregate> {
        let stmt = aggregate_statement(&query);

        let aggregate = match query.measure {
            Measure::Count => {
                let row = CountRow::find_by_statement(stmt)
                    .one(&self.db)
                    .await
                    .map_err(db_error)?;
                Aggregate::Count(row.map_or(0, |r| r.count.max(0) as u64))
            }
            Measure::Average(_) => {
                let row = AverageRow::find_by_statement(stmt)
                    .one(&self.db)
                    .await
                    .map_err(db_error)?;
                Aggregate::Average(row.and_then(|r| r.average))
            }
            Measure::Records => {
                let rows = RecordRow::find_by_statement(stmt)
                    .all(&self.db)
                    .await
                    .map_err(db_error)?;
                Aggregate::Records(rows.into_iter().map(|r| r.data).collect())
            }
        };

        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_count_statement_binds_equality_filters() {
        let query = AggregateQuery::count(EntityKind::Employee)
            .where_eq("departmentId", "eng")
            .where_eq("isActive", true);
        let stmt = aggregate_statement(&query);

        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM hr_records WHERE kind = $1 \
             AND data -> $2::text = $3::jsonb AND data -> $4::text = $5::jsonb"
        );
        assert_eq!(stmt.values.map(|v| v.0.len()), Some(5));
    }

    #[test]
    fn test_average_statement_only_counts_numbers() {
        let stmt = aggregate_statement(&AggregateQuery::average(EntityKind::Payroll, "grossSalary"));

        assert_eq!(
            stmt.sql,
            "SELECT AVG((data ->> $2::text)::float8) AS average FROM hr_records WHERE kind = $1 \
             AND jsonb_typeof(data -> $2::text) = 'number'"
        );
    }

    #[test]
    fn test_records_statement_with_half_open_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = AggregateQuery::records(EntityKind::Attendance).within("date", Some(start), None);
        let stmt = aggregate_statement(&query);

        assert_eq!(
            stmt.sql,
            "SELECT data FROM hr_records WHERE kind = $1 AND data ->> $2::text IS NOT NULL \
             AND (data ->> $2::text)::timestamptz >= $3 ORDER BY seq"
        );
        assert_eq!(stmt.values.map(|v| v.0.len()), Some(3));
    }
}
