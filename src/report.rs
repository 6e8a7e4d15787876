use crate::dates::DateRange;
use crate::error::Error;
use csv::StringRecord;
use log::{info, warn};
use std::io::{Cursor, Read};
use std::sync::Arc;

pub const REPORT_NAME: &str = "CampaignPerformanceReport";
pub const AGGREGATION: &str = "Daily";
pub const REPORT_TIME_ZONE: &str = "PacificTimeUSCanadaTijuana";

pub const CAMPAIGN_PERFORMANCE_COLUMNS: [&str; 9] = [
    "AccountName",
    "AccountId",
    "TimePeriod",
    "CampaignId",
    "CampaignName",
    "Impressions",
    "Clicks",
    "Conversions",
    "Spend",
];

/// What to ask the reporting API for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub name: &'static str,
    pub account_id: String,
    pub range: DateRange,
    pub aggregation: &'static str,
    pub time_zone: &'static str,
    pub columns: Vec<&'static str>,
}

impl ReportRequest {
    pub fn campaign_performance(account_id: &str, range: DateRange) -> Self {
        ReportRequest {
            name: REPORT_NAME,
            account_id: account_id.to_string(),
            range,
            aggregation: AGGREGATION,
            time_zone: REPORT_TIME_ZONE,
            columns: CAMPAIGN_PERFORMANCE_COLUMNS.to_vec(),
        }
    }
}

/// Typed, by-name access to a single report row.
pub trait ReportRow {
    /// Raw text of `column`.
    fn value(&self, column: &str) -> Result<&str, Error>;

    fn int_value(&self, column: &str) -> Result<i64, Error> {
        let raw = self.value(column)?;
        raw.trim().parse::<i64>().map_err(|_| Error::InvalidValue {
            column: column.to_string(),
            value: raw.to_string(),
            expected: "integer",
        })
    }

    fn float_value(&self, column: &str) -> Result<f64, Error> {
        let raw = self.value(column)?;
        raw.trim().parse::<f64>().map_err(|_| Error::InvalidValue {
            column: column.to_string(),
            value: raw.to_string(),
            expected: "float",
        })
    }
}

/// A data row of a downloaded CSV report, sharing the header row with its
/// siblings.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    header: Arc<StringRecord>,
    values: StringRecord,
}

impl ReportRecord {
    pub fn new(header: Arc<StringRecord>, values: StringRecord) -> Self {
        ReportRecord { header, values }
    }
}

impl ReportRow for ReportRecord {
    fn value(&self, column: &str) -> Result<&str, Error> {
        self.header
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| Error::MissingColumn {
                column: column.to_string(),
            })
    }
}

/// Pulls the first `.csv` entry out of a downloaded report archive.
pub fn extract_csv_from_zip(archive: &[u8]) -> Result<Vec<u8>, Error> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.name().to_ascii_lowercase().ends_with(".csv") {
            info!("Found report file {} in archive", file.name());
            let mut csv = Vec::new();
            file.read_to_end(&mut csv)?;
            return Ok(csv);
        }
    }

    Err(Error::ReportArchive(zip::result::ZipError::FileNotFound))
}

/// Parses a report CSV into records.
///
/// Reports may carry a preamble (report name, time range, ...) before the
/// column header row and a copyright footer after the data. The header row is
/// the first row whose first cell is `first_column`; data ends at the first
/// row that is shorter than the header.
pub fn parse_report_csv(data: &[u8], first_column: &str) -> Result<Vec<ReportRecord>, Error> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut header: Option<Arc<StringRecord>> = None;
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;

        match &header {
            None => {
                if row.get(0).map(str::trim) == Some(first_column) {
                    let trimmed: StringRecord = row.iter().map(str::trim).collect();
                    header = Some(Arc::new(trimmed));
                }
            }
            Some(columns) => {
                if row.len() < columns.len() {
                    if row.iter().any(|cell| !cell.trim().is_empty()) {
                        warn!("Stopping at report footer row: {:?}", row);
                    }
                    break;
                }
                records.push(ReportRecord::new(columns.clone(), row));
            }
        }
    }

    if header.is_none() {
        return Err(Error::MissingColumn {
            column: first_column.to_string(),
        });
    }

    Ok(records)
}
