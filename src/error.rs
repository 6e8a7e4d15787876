use datafusion::error::DataFusionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid date '{date}', expected YYYY-MM-DD")]
    InvalidDateFormat { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Invalid trigger event: {message}")]
    InvalidEvent { message: String },

    #[error("Reporting API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("OAuth token refresh failed: {message}")]
    Authentication { message: String },

    #[error("Report request {request_id} finished with status '{status}'")]
    ReportFailed { request_id: String, status: String },

    #[error("Report request {request_id} did not complete within {timeout_ms}ms")]
    ReportTimeout { request_id: String, timeout_ms: u64 },

    #[error("Report download is not a readable archive: {0}")]
    ReportArchive(#[from] zip::result::ZipError),

    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column '{column}' not found in report")]
    MissingColumn { column: String },

    #[error("Column '{column}' value '{value}' is not a valid {expected}")]
    InvalidValue {
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("Schema config for table {table} is invalid: {message}")]
    SchemaConfig { table: String, message: String },

    #[error("Failed to load rows into {table}: {source}")]
    Load {
        table: String,
        #[source]
        source: DataFusionError,
    },

    #[error("Failed to reconcile {table}: {source}")]
    Reconcile {
        table: String,
        #[source]
        source: DataFusionError,
    },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}
