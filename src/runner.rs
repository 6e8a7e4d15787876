use crate::api_client::ReportApi;
use crate::dates;
use crate::error::Error;
use crate::event::ReportWindow;
use crate::report::ReportRequest;
use crate::transform::transform;
use crate::warehouse::{TableSpec, Warehouse};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub table: String,
    pub num_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_rows: Option<usize>,
}

/// Pulls the campaign performance report for one account into a warehouse
/// table.
pub struct CampaignPerformanceJob<'a> {
    pub api: &'a dyn ReportApi,
    pub warehouse: &'a dyn Warehouse,
    pub account_id: &'a str,
    pub table: &'a TableSpec,
}

impl CampaignPerformanceJob<'_> {
    /// Runs fetch, transform, load and reconcile in order. `started_at` stamps
    /// every loaded row and anchors the default date window.
    pub async fn run(
        &self,
        window: &ReportWindow,
        started_at: DateTime<Utc>,
    ) -> Result<JobSummary, Error> {
        let range = dates::resolve(
            window.start.as_deref(),
            window.end.as_deref(),
            started_at.date_naive(),
        )?;

        if range.start > range.end {
            return Err(Error::StartDateAfterEndDate {
                start_date: range.start.to_string(),
                end_date: range.end.to_string(),
            });
        }

        info!(
            "Fetching {} for account {} from {} to {}",
            self.table.name, self.account_id, range.start, range.end
        );

        let request = ReportRequest::campaign_performance(self.account_id, range);
        let rows = self.api.fetch_report(&request).await?;

        let mut summary = JobSummary {
            table: self.table.name.clone(),
            num_processed: rows.len(),
            output_rows: None,
        };

        if rows.is_empty() {
            info!("No rows returned, skipping load");
            return Ok(summary);
        }

        let records = transform(&rows, &started_at)?;
        let loaded = self.warehouse.load(self.table, &records).await?;
        self.warehouse.reconcile(self.table).await?;

        summary.output_rows = Some(loaded.rows_written);

        Ok(summary)
    }
}
