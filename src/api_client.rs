use crate::auth::{refresh_access_token, OAuthCredentials};
use crate::config::Config;
use crate::error::Error;
use crate::report::{extract_csv_from_zip, parse_report_csv, ReportRecord, ReportRequest};
use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use reqwest::{header::AUTHORIZATION, Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportApi: Send + Sync + 'static {
    /// Requests a report and waits for it to materialize.
    /// # Arguments
    /// * `request` - The report definition: scope, date range and columns.
    /// # Returns
    /// A Result containing either the report's data rows or an Error.
    /// An empty report yields an empty vector.
    async fn fetch_report(&self, request: &ReportRequest) -> Result<Vec<ReportRecord>, Error>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token_url: String,
    credentials: OAuthCredentials,
    developer_token: String,
    customer_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitRequest<'a> {
    report_request: WireReportRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireReportRequest<'a> {
    #[serde(rename = "Type")]
    request_type: String,
    report_name: &'a str,
    format: &'static str,
    exclude_column_headers: bool,
    exclude_report_header: bool,
    exclude_report_footer: bool,
    return_only_complete_data: bool,
    aggregation: &'a str,
    columns: &'a [&'static str],
    scope: WireScope,
    time: WireTime<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireScope {
    account_ids: Vec<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireTime<'a> {
    custom_date_range_start: WireDate,
    custom_date_range_end: WireDate,
    report_time_zone: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireDate {
    day: u32,
    month: u32,
    year: i32,
}

impl From<NaiveDate> for WireDate {
    fn from(date: NaiveDate) -> Self {
        WireDate {
            day: date.day(),
            month: date.month(),
            year: date.year(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitResponse {
    report_request_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PollRequest<'a> {
    report_request_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PollResponse {
    report_request_status: ReportRequestStatus,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct ReportRequestStatus {
    status: String,
    report_download_url: Option<String>,
}

impl<'a> WireReportRequest<'a> {
    fn from_request(request: &'a ReportRequest) -> Result<Self, Error> {
        let account_id = request
            .account_id
            .parse::<i64>()
            .map_err(|_| Error::InvalidValue {
                column: "AccountId".to_string(),
                value: request.account_id.clone(),
                expected: "integer",
            })?;

        Ok(WireReportRequest {
            request_type: format!("{}Request", request.name),
            report_name: request.name,
            format: "Csv",
            exclude_column_headers: false,
            exclude_report_header: false,
            exclude_report_footer: false,
            return_only_complete_data: false,
            aggregation: request.aggregation,
            columns: &request.columns,
            scope: WireScope {
                account_ids: vec![account_id],
            },
            time: WireTime {
                custom_date_range_start: request.range.start.into(),
                custom_date_range_end: request.range.end.into(),
                report_time_zone: request.time_zone,
            },
        })
    }
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(ApiClient {
            client: Client::new(),
            base_url: Url::parse(&config.api_url)?,
            token_url: config.token_url.to_string(),
            credentials: OAuthCredentials {
                client_id: config.client_id.to_string(),
                client_secret: config.client_secret.clone(),
                refresh_token: config.refresh_token.to_string(),
            },
            developer_token: config.developer_token.to_string(),
            customer_id: config.customer_id.to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_millis(config.report_timeout_ms),
        })
    }

    fn endpoint(&self, operation: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::UrlParsingFailed(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(&["Reporting", "v13", "GenerateReport", operation]);
        Ok(url)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        operation: &str,
        access_token: &str,
        account_id: &str,
        body: &B,
    ) -> Result<R, Error> {
        let resp = self
            .client
            .post(self.endpoint(operation)?)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header("DeveloperToken", &self.developer_token)
            .header("CustomerId", &self.customer_id)
            .header("CustomerAccountId", account_id)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<R>().await?)
    }

    async fn wait_for_report(
        &self,
        access_token: &str,
        account_id: &str,
        request_id: &str,
    ) -> Result<Option<String>, Error> {
        let started = Instant::now();

        loop {
            let poll: PollResponse = self
                .post(
                    "Poll",
                    access_token,
                    account_id,
                    &PollRequest {
                        report_request_id: request_id,
                    },
                )
                .await?;

            let status = poll.report_request_status;
            debug!("Report request {} status: {}", request_id, status.status);

            match poll_outcome(status, request_id, started.elapsed(), self.timeout)? {
                PollOutcome::Ready(download_url) => return Ok(download_url),
                PollOutcome::Wait => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum PollOutcome {
    /// The report is built; `None` means it has no data to download.
    Ready(Option<String>),
    Wait,
}

/// Decides what to do after one poll, given how long the request has been
/// pending.
fn poll_outcome(
    status: ReportRequestStatus,
    request_id: &str,
    elapsed: Duration,
    timeout: Duration,
) -> Result<PollOutcome, Error> {
    match status.status.as_str() {
        "Success" => Ok(PollOutcome::Ready(
            status.report_download_url.filter(|u| !u.is_empty()),
        )),
        "Pending" if elapsed >= timeout => Err(Error::ReportTimeout {
            request_id: request_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        "Pending" => Ok(PollOutcome::Wait),
        other => Err(Error::ReportFailed {
            request_id: request_id.to_string(),
            status: other.to_string(),
        }),
    }
}

#[async_trait::async_trait]
impl ReportApi for ApiClient {
    async fn fetch_report(&self, request: &ReportRequest) -> Result<Vec<ReportRecord>, Error> {
        let body = SubmitRequest {
            report_request: WireReportRequest::from_request(request)?,
        };

        let access_token =
            refresh_access_token(&self.client, &self.token_url, &self.credentials).await?;

        let submitted: SubmitResponse = self
            .post("Submit", &access_token, &request.account_id, &body)
            .await?;
        info!(
            "Submitted {} for {} to {} as request {}",
            request.name, request.range.start, request.range.end, submitted.report_request_id
        );

        let download_url = match self
            .wait_for_report(&access_token, &request.account_id, &submitted.report_request_id)
            .await?
        {
            Some(url) => url,
            None => {
                info!("Report {} has no data", submitted.report_request_id);
                return Ok(vec![]);
            }
        };

        let archive = self
            .client
            .get(&download_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let csv = extract_csv_from_zip(&archive)?;
        let first_column = request.columns.first().copied().unwrap_or_default();
        let records = parse_report_csv(&csv, first_column)?;

        info!("Downloaded {} report rows", records.len());

        Ok(records)
    }
}
