//! `generate-report`: build a report and, for most types, email it to the
//! requester.

use super::{HrDependencies, fields};
use crate::error::HrJobResult;
use crate::models::{EmailType, ReportJob, ReportParameters, ReportType, SendEmailJob, job_types};
use crate::store::{AggregateQuery, EntityKind, RecordStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_queue::{FollowUp, Job, JobError, JobHandler, JobResult, QueueName};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

const CANDIDATE_STATUSES: [&str; 4] = ["APPLIED", "INTERVIEWED", "HIRED", "REJECTED"];
const TOP_PERFORMERS: usize = 5;

/// Report payload plus the number of records it was built from.
struct BuiltReport {
    data: Value,
    record_count: usize,
}

fn number(record: &Value, field: &str) -> f64 {
    record.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Restrict `field` to the report period when one is given.
fn in_period(query: AggregateQuery, field: &str, params: &ReportParameters) -> AggregateQuery {
    if params.start_date.is_none() && params.end_date.is_none() {
        query
    } else {
        query.within(field, params.start_date, params.end_date)
    }
}

fn full_name(record: &Value) -> String {
    let first = record.get("firstName").and_then(Value::as_str).unwrap_or_default();
    let last = record.get("lastName").and_then(Value::as_str).unwrap_or_default();
    format!("{} {}", first, last).trim().to_string()
}

fn period(params: &ReportParameters) -> Value {
    json!({"startDate": params.start_date, "endDate": params.end_date})
}

/// Report handler.
pub struct ReportProcessor {
    store: Arc<dyn RecordStore>,
}

impl ReportProcessor {
    pub fn new(deps: &HrDependencies) -> Self {
        Self {
            store: deps.store.clone(),
        }
    }

    async fn records(&self, query: AggregateQuery) -> HrJobResult<Vec<Value>> {
        self.store.read_aggregate(query).await?.into_records()
    }

    async fn build(&self, report_type: ReportType, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        match report_type {
            ReportType::PayrollSummary => self.payroll_summary(params).await,
            ReportType::AttendanceReport => self.attendance_report(params).await,
            ReportType::DepartmentPerformance => self.department_performance(params).await,
            ReportType::RecruitmentAnalytics => self.recruitment_analytics(params).await,
            ReportType::PerformanceReview => self.performance_review(params).await,
        }
    }

    async fn payroll_summary(&self, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        let query = AggregateQuery::records(EntityKind::Payroll)
            .where_eq_opt("departmentId", params.department_id.as_deref());
        let records = self.records(in_period(query, "payPeriodStart", params)).await?;

        let total_gross: f64 = records.iter().map(|r| number(r, "grossSalary")).sum();
        let total_net: f64 = records.iter().map(|r| number(r, "netSalary")).sum();
        let average_gross = if records.is_empty() {
            0.0
        } else {
            total_gross / records.len() as f64
        };

        Ok(BuiltReport {
            record_count: records.len(),
            data: json!({
                "type": ReportType::PayrollSummary,
                "period": period(params),
                "departmentId": params.department_id,
                "employeeCount": records.len(),
                "totalGrossSalary": total_gross,
                "totalNetSalary": total_net,
                "averageGrossSalary": average_gross,
                "records": records,
            }),
        })
    }

    async fn attendance_report(&self, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        let query = AggregateQuery::records(EntityKind::Attendance)
            .where_eq_opt("departmentId", params.department_id.as_deref());
        let records = self.records(in_period(query, "date", params)).await?;

        let hours: Vec<f64> = records.iter().filter_map(|r| r.get("hoursWorked")?.as_f64()).collect();

        Ok(BuiltReport {
            record_count: records.len(),
            data: json!({
                "type": ReportType::AttendanceReport,
                "period": period(params),
                "departmentId": params.department_id,
                "totalRecords": records.len(),
                "averageHours": mean(&hours),
                "records": records,
            }),
        })
    }

    async fn department_performance(&self, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        let department_id = params.department_id.as_deref();
        let employees_query = AggregateQuery::records(EntityKind::Employee)
            .where_eq_opt("departmentId", department_id)
            .where_eq("isActive", true);
        let department_query = AggregateQuery::records(EntityKind::Department).where_eq_opt("id", department_id);

        let (employees, departments) =
            tokio::try_join!(self.records(employees_query), self.records(department_query))?;
        let department = departments.first();

        let active_users = employees
            .iter()
            .filter(|e| e.get("userIsActive").and_then(Value::as_bool) != Some(false))
            .count();
        let roster: Vec<Value> = employees
            .iter()
            .map(|e| {
                json!({
                    "id": e.get("id"),
                    "name": full_name(e),
                    "position": e.get("position"),
                    "email": e.get("email"),
                    "isActive": e.get("userIsActive").and_then(Value::as_bool).unwrap_or(true),
                    "hireDate": e.get("hireDate"),
                })
            })
            .collect();

        Ok(BuiltReport {
            record_count: employees.len(),
            data: json!({
                "type": ReportType::DepartmentPerformance,
                "period": period(params),
                "department": {
                    "id": department_id,
                    "name": department.and_then(|d| d.get("name")),
                    "budget": department.and_then(|d| d.get("budget")),
                    "employeeCount": employees.len(),
                    "activeEmployees": active_users,
                },
                "employees": roster,
            }),
        })
    }

    async fn recruitment_analytics(&self, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        let query = AggregateQuery::records(EntityKind::Candidate)
            .where_eq_opt("jobPostingId", params.job_posting_id.as_deref());
        let candidates = self.records(in_period(query, "appliedAt", params)).await?;

        let mut breakdown: BTreeMap<&str, usize> = CANDIDATE_STATUSES.iter().map(|s| (*s, 0)).collect();
        for status in candidates.iter().filter_map(|c| c.get("status")?.as_str()) {
            if let Some(count) = breakdown.get_mut(status) {
                *count += 1;
            }
        }

        let interviewed = candidates
            .iter()
            .filter(|c| c.get("interviewCount").and_then(Value::as_u64).unwrap_or(0) > 0)
            .count();
        let fit_scores: Vec<f64> = candidates.iter().filter_map(|c| c.get("fitScore")?.as_f64()).collect();

        Ok(BuiltReport {
            record_count: candidates.len(),
            data: json!({
                "type": ReportType::RecruitmentAnalytics,
                "period": period(params),
                "jobPostingId": params.job_posting_id,
                "totalApplications": candidates.len(),
                "interviewedCount": interviewed,
                "hiredCount": breakdown.get("HIRED").copied().unwrap_or(0),
                "averageFitScore": mean(&fit_scores),
                "statusBreakdown": breakdown,
            }),
        })
    }

    /// Reviews filtered by period label and employee, ranked by overall rating.
    async fn performance_review(&self, params: &ReportParameters) -> HrJobResult<BuiltReport> {
        let query = AggregateQuery::records(EntityKind::PerformanceReview)
            .where_eq_opt("reviewPeriod", params.review_period.as_deref())
            .where_eq_opt("employeeId", params.employee_id.as_deref());
        let reviews = self.records(query).await?;

        let mut rated: Vec<(&Value, f64)> = reviews
            .iter()
            .filter_map(|r| Some((r, r.get("overallRating")?.as_f64()?)))
            .collect();
        let ratings: Vec<f64> = rated.iter().map(|(_, rating)| *rating).collect();
        rated.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top_performers: Vec<Value> = rated
            .iter()
            .take(TOP_PERFORMERS)
            .map(|(review, rating)| {
                json!({
                    "employeeId": review.get("employeeId"),
                    "employeeName": full_name(review),
                    "rating": rating,
                })
            })
            .collect();

        Ok(BuiltReport {
            record_count: reviews.len(),
            data: json!({
                "type": ReportType::PerformanceReview,
                "reviewPeriod": params.review_period,
                "employeeId": params.employee_id,
                "totalReviews": reviews.len(),
                "averageRating": mean(&ratings),
                "topPerformers": top_performers,
                "reviews": reviews,
            }),
        })
    }

    fn delivery(
        &self,
        requester: &str,
        report_type: ReportType,
        report: &Value,
        generated_at: DateTime<Utc>,
        params: &ReportParameters,
    ) -> HrJobResult<FollowUp> {
        let email = SendEmailJob::new(
            EmailType::ReportGenerated,
            requester,
            fields(json!({
                "reportType": report_type,
                "reportData": serde_json::to_string_pretty(report)?,
                "generatedAt": generated_at,
                "period": period(params),
            })),
        );

        Ok(FollowUp::new(
            QueueName::EmailNotifications,
            job_types::SEND_EMAIL,
            serde_json::to_value(email)?,
        ))
    }
}

#[async_trait]
impl JobHandler for ReportProcessor {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        let payload: ReportJob = job.decode()?;
        info!(
            job_id = %job.id,
            report_type = %payload.report_type,
            user_id = ?payload.user_id,
            "Generating report"
        );

        let report_type: ReportType = payload.report_type.parse().map_err(|_| {
            error!(report_type = %payload.report_type, "Unknown report type");
            JobError::UnknownReportType(payload.report_type.clone())
        })?;

        let report = self.build(report_type, &payload.parameters).await.inspect_err(|e| {
            error!(report_type = %report_type, error = %e, "Report generation failed");
        })?;
        let generated_at = Utc::now();
        info!(report_type = %report_type, records = report.record_count, "Report generated");

        let follow_up = match payload.requester_email.as_deref() {
            Some(requester) if report_type.is_emailed() => Some(self.delivery(
                requester,
                report_type,
                &report.data,
                generated_at,
                &payload.parameters,
            )?),
            _ => None,
        };

        let result = JobResult::success(json!({
            "success": true,
            "reportType": report_type,
            "recordCount": report.record_count,
            "generatedAt": generated_at,
            "reportData": report.data,
        }));

        Ok(match follow_up {
            Some(follow_up) => result.with_follow_up(follow_up),
            None => result,
        })
    }

    fn name(&self) -> &'static str {
        "ReportProcessor"
    }
}
