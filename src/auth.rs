use crate::error::Error;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

const SCOPE: &str = "https://ads.microsoft.com/msads.manage offline_access";

/// OAuth client credentials for the refresh-token grant.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("refresh_token", &"***")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuthCredentials {
    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
            ("scope", SCOPE),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form
    }
}

/// Exchanges the refresh token for a fresh access token.
pub async fn refresh_access_token(
    client: &Client,
    token_url: &str,
    credentials: &OAuthCredentials,
) -> Result<String, Error> {
    let resp = client
        .post(token_url)
        .form(&credentials.form())
        .send()
        .await?;

    let status = resp.status();
    let body: TokenResponse = resp.json().await?;

    match body.access_token {
        Some(token) if status.is_success() => {
            debug!("Refreshed access token for client {}", credentials.client_id);
            Ok(token)
        }
        _ => Err(Error::Authentication {
            message: format!(
                "{} ({})",
                body.error_description
                    .or(body.error)
                    .unwrap_or_else(|| "no access token in response".to_string()),
                status
            ),
        }),
    }
}
