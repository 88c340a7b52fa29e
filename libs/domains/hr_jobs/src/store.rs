//! Record store collaborator.
//!
//! Handlers only ever do two things with HR records: set fields on one entity,
//! and read an aggregate over a filtered set of records. The trait keeps to
//! exactly that so a database-backed store and the in-memory store are
//! interchangeable.

use crate::error::{HrJobError, HrJobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use strum::{AsRefStr, Display};
use tokio::sync::RwLock;
use tracing::debug;

/// HR record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Candidate,
    Interview,
    InterviewTranscript,
    Employee,
    Payroll,
    Attendance,
    LeaveRequest,
    Department,
    PerformanceReview,
}

/// Inclusive bounds on a timestamp field. Open ends are unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRange {
    pub field: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FieldRange {
    fn contains(&self, record: &Map<String, Value>) -> bool {
        let Some(at) = record
            .get(&self.field)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return false;
        };

        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

/// Conjunction of field equalities and an optional timestamp range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub equals: Vec<(String, Value)>,
    pub range: Option<FieldRange>,
}

impl RecordFilter {
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
            && self.range.as_ref().is_none_or(|range| range.contains(record))
    }
}

/// What to compute over the matching records.
#[derive(Debug, Clone, PartialEq)]
pub enum Measure {
    Count,
    /// Arithmetic mean of a numeric field
    Average(String),
    Records,
}

/// An aggregate read: record kind, filter and measure.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub kind: EntityKind,
    pub filter: RecordFilter,
    pub measure: Measure,
}

impl AggregateQuery {
    pub fn count(kind: EntityKind) -> Self {
        Self::new(kind, Measure::Count)
    }

    pub fn average(kind: EntityKind, field: impl Into<String>) -> Self {
        Self::new(kind, Measure::Average(field.into()))
    }

    pub fn records(kind: EntityKind) -> Self {
        Self::new(kind, Measure::Records)
    }

    fn new(kind: EntityKind, measure: Measure) -> Self {
        Self {
            kind,
            filter: RecordFilter::default(),
            measure,
        }
    }

    /// Require `field == value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.equals.push((field.into(), value.into()));
        self
    }

    /// Require `field == value` when a value is given.
    pub fn where_eq_opt(self, field: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.where_eq(field, value),
            None => self,
        }
    }

    /// Require the timestamp `field` to fall within `[start, end]`.
    pub fn within(
        mut self,
        field: impl Into<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.filter.range = Some(FieldRange {
            field: field.into(),
            start,
            end,
        });
        self
    }
}

/// Result of an aggregate read.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Count(u64),
    /// `None` when no record carried the field
    Average(Option<f64>),
    Records(Vec<Value>),
}

impl Aggregate {
    pub fn into_count(self) -> HrJobResult<u64> {
        match self {
            Aggregate::Count(n) => Ok(n),
            other => Err(HrJobError::Store(format!("expected a count, got {:?}", other))),
        }
    }

    pub fn into_average(self) -> HrJobResult<Option<f64>> {
        match self {
            Aggregate::Average(avg) => Ok(avg),
            other => Err(HrJobError::Store(format!("expected an average, got {:?}", other))),
        }
    }

    pub fn into_records(self) -> HrJobResult<Vec<Value>> {
        match self {
            Aggregate::Records(records) => Ok(records),
            other => Err(HrJobError::Store(format!("expected records, got {:?}", other))),
        }
    }
}

/// Record store used by the HR handlers.
///
/// Implementations are shared by every concurrent handler. `update_entity`
/// sets fields to final values, so repeating it is harmless.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Set `fields` on the entity `kind`/`id`.
    async fn update_entity(&self, kind: EntityKind, id: &str, fields: Map<String, Value>) -> HrJobResult<()>;

    /// Compute an aggregate over the records matching the query.
    async fn read_aggregate(&self, query: AggregateQuery) -> HrJobResult<Aggregate>;
}

/// One `update_entity` call, as applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub kind: EntityKind,
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Updates kept in the in-memory log before the oldest are dropped.
pub const UPDATE_LOG_CAPACITY: usize = 1024;

/// Record store held in memory.
///
/// Records are JSON objects keyed by their `"id"` field. Timestamps are RFC 3339
/// strings. Updating an unknown id creates the record. The latest
/// [`UPDATE_LOG_CAPACITY`] updates are also kept in a log, oldest first.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<EntityKind, Vec<Map<String, Value>>>>,
    updates: RwLock<VecDeque<EntityUpdate>>,
    update_capacity: usize,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::with_update_capacity(UPDATE_LOG_CAPACITY)
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::default(),
            updates: RwLock::default(),
            update_capacity: capacity,
        }
    }

    /// Seed a record. Non-object values are ignored.
    pub async fn insert(&self, kind: EntityKind, record: Value) {
        if let Value::Object(record) = record {
            self.records.write().await.entry(kind).or_default().push(record);
        }
    }

    /// Seed many records of one kind.
    pub async fn insert_all(&self, kind: EntityKind, records: impl IntoIterator<Item = Value>) {
        for record in records {
            self.insert(kind, record).await;
        }
    }

    /// Current state of one entity.
    pub async fn entity(&self, kind: EntityKind, id: &str) -> Option<Map<String, Value>> {
        self.records
            .read()
            .await
            .get(&kind)?
            .iter()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .cloned()
    }

    /// Updates applied so far, oldest first.
    pub async fn updates(&self) -> Vec<EntityUpdate> {
        self.updates.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn update_entity(&self, kind: EntityKind, id: &str, fields: Map<String, Value>) -> HrJobResult<()> {
        let mut records = self.records.write().await;
        let table = records.entry(kind).or_default();

        match table
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
        {
            Some(record) => record.extend(fields.clone()),
            None => {
                let mut record = Map::new();
                record.insert("id".to_string(), Value::String(id.to_string()));
                record.extend(fields.clone());
                table.push(record);
            }
        }

        let mut updates = self.updates.write().await;
        if self.update_capacity > 0 {
            if updates.len() == self.update_capacity {
                updates.pop_front();
            }
            updates.push_back(EntityUpdate {
                kind,
                id: id.to_string(),
                fields,
            });
        }

        debug!(kind = %kind, id = %id, "Entity updated");
        Ok(())
    }

    async fn read_aggregate(&self, query: AggregateQuery) -> HrJobResult<Aggregate> {
        let records = self.records.read().await;
        let matching = records
            .get(&query.kind)
            .into_iter()
            .flatten()
            .filter(|r| query.filter.matches(r));

        let aggregate = match &query.measure {
            Measure::Count => Aggregate::Count(matching.count() as u64),
            Measure::Average(field) => {
                let values: Vec<f64> = matching.filter_map(|r| r.get(field).and_then(Value::as_f64)).collect();
                if values.is_empty() {
                    Aggregate::Average(None)
                } else {
                    Aggregate::Average(Some(values.iter().sum::<f64>() / values.len() as f64))
                }
            }
            Measure::Records => Aggregate::Records(matching.cloned().map(Value::Object).collect()),
        };

        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn seeded() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        store
            .insert_all(
                EntityKind::Payroll,
                [
                    json!({"id": "p1", "departmentId": "eng", "grossSalary": 5000.0, "payPeriodStart": "2024-01-01T00:00:00Z"}),
                    json!({"id": "p2", "departmentId": "eng", "grossSalary": 7000.0, "payPeriodStart": "2024-02-01T00:00:00Z"}),
                    json!({"id": "p3", "departmentId": "eng", "grossSalary": 9000.0, "payPeriodStart": "2023-06-01T00:00:00Z"}),
                    json!({"id": "p4", "departmentId": "ops", "grossSalary": 1000.0, "payPeriodStart": "2024-01-15T00:00:00Z"}),
                ],
            )
            .await;
        store
    }

    #[tokio::test]
    async fn test_average_respects_filter_and_range() {
        let store = seeded().await;
        let avg = store
            .read_aggregate(
                AggregateQuery::average(EntityKind::Payroll, "grossSalary")
                    .where_eq("departmentId", "eng")
                    .within("payPeriodStart", Some(ts(2024, 1, 1)), Some(ts(2024, 12, 31))),
            )
            .await
            .unwrap()
            .into_average()
            .unwrap();
        assert_eq!(avg, Some(6000.0));
    }

    #[tokio::test]
    async fn test_average_of_nothing_is_none() {
        let store = seeded().await;
        let avg = store
            .read_aggregate(AggregateQuery::average(EntityKind::Attendance, "hoursWorked"))
            .await
            .unwrap();
        assert_eq!(avg, Aggregate::Average(None));
    }

    #[tokio::test]
    async fn test_update_merges_and_upserts() {
        let store = InMemoryRecordStore::new();
        store
            .insert(EntityKind::Candidate, json!({"id": "c-1", "name": "Ada"}))
            .await;

        let mut fields = Map::new();
        fields.insert("isProcessed".to_string(), json!(true));
        store.update_entity(EntityKind::Candidate, "c-1", fields.clone()).await.unwrap();
        store.update_entity(EntityKind::Candidate, "c-2", fields).await.unwrap();

        let ada = store.entity(EntityKind::Candidate, "c-1").await.unwrap();
        assert_eq!(ada["name"], json!("Ada"));
        assert_eq!(ada["isProcessed"], json!(true));
        assert!(store.entity(EntityKind::Candidate, "c-2").await.is_some());

        let log = store.updates().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, "c-1");
        assert_eq!(log[1].id, "c-2");
        assert_eq!(log[1].fields["isProcessed"], json!(true));
    }

    #[tokio::test]
    async fn test_update_log_keeps_latest_entries() {
        let store = InMemoryRecordStore::with_update_capacity(2);
        for id in ["c-1", "c-2", "c-3"] {
            store.update_entity(EntityKind::Candidate, id, Map::new()).await.unwrap();
        }

        let ids: Vec<String> = store.updates().await.into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["c-2".to_string(), "c-3".to_string()]);
        assert!(store.entity(EntityKind::Candidate, "c-1").await.is_some());
    }

    #[tokio::test]
    async fn test_records_and_count() {
        let store = seeded().await;
        let query = AggregateQuery::records(EntityKind::Payroll).where_eq_opt("departmentId", Some("ops"));
        let records = store.read_aggregate(query).await.unwrap().into_records().unwrap();
        assert_eq!(records.len(), 1);

        let count = store
            .read_aggregate(AggregateQuery::count(EntityKind::Payroll).where_eq_opt("departmentId", None))
            .await
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_mismatched_aggregate_is_a_store_error() {
        assert!(matches!(Aggregate::Count(3).into_average(), Err(HrJobError::Store(_))));
    }
}
