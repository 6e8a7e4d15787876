use clap::Args as ClapArgs;

const DEFAULT_API_URL: &str = "https://reporting.api.bingads.microsoft.com";
const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const DEFAULT_ACCOUNT_ID: &str = "180518526";
const DEFAULT_CUSTOMER_ID: &str = "251631063";
const WAREHOUSE_DIR: &str = "./warehouse";
const DATASET: &str = "BingAds";
const SCHEMA_DIR: &str = "./configs";
const POLL_INTERVAL_MS: &str = "5000";
const REPORT_TIMEOUT_MS: &str = "3600000";

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
    pub(crate) api_url: String,

    #[arg(long, default_value = DEFAULT_TOKEN_URL, env = "OAUTH_TOKEN_URL")]
    pub(crate) token_url: String,

    #[arg(long, env = "CLIENT_ID")]
    pub(crate) client_id: String,

    #[arg(long, env = "CLIENT_SECRET")]
    pub(crate) client_secret: Option<String>,

    #[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
    pub(crate) refresh_token: String,

    #[arg(long, env = "DEVELOPER_TOKEN", hide_env_values = true)]
    pub(crate) developer_token: String,

    #[arg(long, default_value = DEFAULT_CUSTOMER_ID, env = "CUSTOMER_ID")]
    pub(crate) customer_id: String,

    #[arg(long, default_value = DEFAULT_ACCOUNT_ID, env = "ACCOUNT_ID")]
    pub(crate) account_id: String,

    #[arg(long, default_value = WAREHOUSE_DIR, env = "WAREHOUSE_DIR")]
    pub(crate) warehouse_dir: String,

    #[arg(long, default_value = DATASET, env = "DATASET")]
    pub(crate) dataset: String,

    #[arg(long, default_value = SCHEMA_DIR, env = "SCHEMA_DIR")]
    pub(crate) schema_dir: String,

    #[arg(long, default_value = POLL_INTERVAL_MS, env = "POLL_INTERVAL_MS")]
    pub(crate) poll_interval_ms: u64,

    #[arg(long, default_value = REPORT_TIMEOUT_MS, env = "REPORT_TIMEOUT_MS")]
    pub(crate) report_timeout_ms: u64,
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: "client".to_string(),
            client_secret: None,
            refresh_token: "refresh".to_string(),
            developer_token: "developer".to_string(),
            customer_id: DEFAULT_CUSTOMER_ID.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            warehouse_dir: WAREHOUSE_DIR.to_string(),
            dataset: DATASET.to_string(),
            schema_dir: SCHEMA_DIR.to_string(),
            poll_interval_ms: 10,
            report_timeout_ms: 100,
        }
    }
}
