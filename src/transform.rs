use crate::error::Error;
use crate::report::ReportRow;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const BATCHED_AT: &str = "_batched_at";

/// Columns identifying the same fact across runs.
pub const NATURAL_KEY: [&str; 5] = [
    "AccountName",
    "AccountId",
    "TimePeriod",
    "CampaignId",
    "CampaignName",
];

/// A report row in warehouse shape. Field names serialize to the table's
/// column names.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NormalizedRecord {
    pub account_name: String,
    pub account_id: i64,
    pub time_period: String,
    pub campaign_id: i64,
    pub campaign_name: String,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    #[serde(rename = "_batched_at")]
    pub batched_at: String,
}

/// Formats the run timestamp the way it is stored in `_batched_at`:
/// ISO-8601, second precision, no offset.
pub fn format_batch_timestamp(batched_at: &DateTime<Utc>) -> String {
    batched_at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn transform<R: ReportRow>(
    rows: &[R],
    batched_at: &DateTime<Utc>,
) -> Result<Vec<NormalizedRecord>, Error> {
    let batched_at = format_batch_timestamp(batched_at);

    rows.iter()
        .map(|row| {
            Ok(NormalizedRecord {
                account_name: row.value("AccountName")?.to_string(),
                account_id: row.int_value("AccountId")?,
                time_period: row.value("TimePeriod")?.to_string(),
                campaign_id: row.int_value("CampaignId")?,
                campaign_name: row.value("CampaignName")?.to_string(),
                impressions: row.int_value("Impressions")?,
                clicks: row.int_value("Clicks")?,
                conversions: row.int_value("Conversions")?,
                spend: row.float_value("Spend")?,
                batched_at: batched_at.clone(),
            })
        })
        .collect()
}
