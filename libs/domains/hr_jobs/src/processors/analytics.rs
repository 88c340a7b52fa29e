//! `calculate-metrics`: department headcount, pay, hours and leave for a period.

use super::HrDependencies;
use crate::error::HrJobResult;
use crate::models::AnalyticsJob;
use crate::store::{AggregateQuery, EntityKind, RecordStore};
use async_trait::async_trait;
use chrono::Utc;
use job_queue::{Job, JobError, JobHandler, JobResult};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

/// Department analytics handler.
pub struct AnalyticsProcessor {
    store: Arc<dyn RecordStore>,
}

impl AnalyticsProcessor {
    pub fn new(deps: &HrDependencies) -> Self {
        Self {
            store: deps.store.clone(),
        }
    }

    async fn count(&self, query: AggregateQuery) -> HrJobResult<u64> {
        self.store.read_aggregate(query).await?.into_count()
    }

    /// Mean of the matching records, `0` when there are none.
    async fn average(&self, query: AggregateQuery) -> HrJobResult<f64> {
        Ok(self.store.read_aggregate(query).await?.into_average()?.unwrap_or(0.0))
    }

    async fn calculate(&self, job: &AnalyticsJob) -> HrJobResult<Value> {
        let department = job.department_id.as_str();
        let start = Some(job.date_range.start);
        let end = Some(job.date_range.end);

        let (employee_count, average_salary, average_hours, leave_requests) = tokio::try_join!(
            self.count(
                AggregateQuery::count(EntityKind::Employee)
                    .where_eq("departmentId", department)
                    .where_eq("isActive", true)
                    .within("hireDate", start, end),
            ),
            self.average(
                AggregateQuery::average(EntityKind::Payroll, "grossSalary")
                    .where_eq("departmentId", department)
                    .within("payPeriodStart", start, end),
            ),
            self.average(
                AggregateQuery::average(EntityKind::Attendance, "hoursWorked")
                    .where_eq("departmentId", department)
                    .within("date", start, end),
            ),
            self.count(
                AggregateQuery::count(EntityKind::LeaveRequest)
                    .where_eq("departmentId", department)
                    .within("createdAt", start, end),
            ),
        )?;

        Ok(json!({
            "departmentId": department,
            "period": {"start": job.date_range.start, "end": job.date_range.end},
            "metrics": {
                "employeeCount": employee_count,
                "averageSalary": average_salary,
                "averageWeeklyHours": average_hours,
                "leaveRequests": leave_requests,
                "calculatedAt": Utc::now(),
            }
        }))
    }
}

#[async_trait]
impl JobHandler for AnalyticsProcessor {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        let payload: AnalyticsJob = job.decode()?;
        info!(job_id = %job.id, department_id = %payload.department_id, "Calculating analytics");

        let analytics = self.calculate(&payload).await.inspect_err(|e| {
            error!(department_id = %payload.department_id, error = %e, "Analytics calculation failed");
        })?;

        info!(department_id = %payload.department_id, "Analytics calculated");
        Ok(JobResult::success(json!({"success": true, "analytics": analytics})))
    }

    fn name(&self) -> &'static str {
        "AnalyticsProcessor"
    }
}
