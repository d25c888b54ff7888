//! HTTP calls made while onboarding

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// User agent sent to the connect page so it renders the full HTML
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/88.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEVICE_STATUS_PATH: &str = "api/devices/device-status";

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("no verification-code element in connect page")]
    MissingCode,
}

/// Poll response from the device-status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceStatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub jwt: Option<String>,
}

impl DeviceStatusResponse {
    /// The token, once the server reports the device as registered
    pub fn registered_token(&self) -> Option<&str> {
        match self.jwt.as_deref() {
            Some(jwt) if self.status == "registered" && !jwt.is_empty() => Some(jwt),
            _ => None,
        }
    }
}

/// Client details sent with the registration request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserDetails {
    pub user_agent: String,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub language: Option<String>,
    pub time_zone: Option<String>,
}

impl BrowserDetails {
    fn for_agent() -> Self {
        Self {
            user_agent: concat!("suitestream-agent/", env!("CARGO_PKG_VERSION")).into(),
            screen_width: None,
            screen_height: None,
            language: None,
            time_zone: std::env::var("TZ").ok().filter(|tz| !tz.is_empty()),
        }
    }
}

/// Server endpoints used during onboarding
#[async_trait]
pub trait OnboardingApi: Send + Sync {
    /// Fetch the connect page HTML
    async fn fetch_code_page(&self) -> Result<String, OnboardingError>;

    /// Announce the code; the outcome is informational only
    async fn register(&self, code: &str) -> Result<(), OnboardingError>;

    /// Ask whether the code has been registered yet
    async fn poll_status(&self, code: &str) -> Result<DeviceStatusResponse, OnboardingError>;
}

/// `OnboardingApi` over reqwest
pub struct ReqwestOnboardingApi {
    client: reqwest::Client,
    connect_url: Url,
    status_url: Url,
}

impl ReqwestOnboardingApi {
    pub fn new(central_url: &str, connect_url: &str) -> Result<Self, OnboardingError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            connect_url: Url::parse(connect_url)?,
            status_url: status_url(central_url)?,
        })
    }

    pub fn connect_url(&self) -> &Url {
        &self.connect_url
    }

    pub fn status_url(&self) -> &Url {
        &self.status_url
    }
}

fn status_url(central_url: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(central_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DEVICE_STATUS_PATH)
}

fn check_status(response: &reqwest::Response) -> Result<(), OnboardingError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(OnboardingError::Status(status.as_u16()))
    }
}

#[async_trait]
impl OnboardingApi for ReqwestOnboardingApi {
    async fn fetch_code_page(&self) -> Result<String, OnboardingError> {
        let response = self
            .client
            .get(self.connect_url.clone())
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?;
        check_status(&response)?;
        Ok(response.text().await?)
    }

    async fn register(&self, code: &str) -> Result<(), OnboardingError> {
        let body = json!({ "code": code, "browserDetails": BrowserDetails::for_agent() });
        let response = self
            .client
            .post(self.status_url.clone())
            .json(&body)
            .send()
            .await?;
        check_status(&response)
    }

    async fn poll_status(&self, code: &str) -> Result<DeviceStatusResponse, OnboardingError> {
        let response = self
            .client
            .post(self.status_url.clone())
            .json(&json!({ "code": code }))
            .send()
            .await?;
        check_status(&response)?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url_joins_base() {
        assert_eq!(
            status_url("http://central.example").unwrap().as_str(),
            "http://central.example/api/devices/device-status"
        );
        assert_eq!(
            status_url("https://central.example/tenant").unwrap().as_str(),
            "https://central.example/tenant/api/devices/device-status"
        );
    }

    #[test]
    fn test_registered_token() {
        let registered: DeviceStatusResponse =
            serde_json::from_str(r#"{"status":"registered","jwt":"tok"}"#).unwrap();
        assert_eq!(registered.registered_token(), Some("tok"));

        let pending: DeviceStatusResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(pending.registered_token(), None);

        let no_jwt: DeviceStatusResponse =
            serde_json::from_str(r#"{"status":"registered","jwt":null}"#).unwrap();
        assert_eq!(no_jwt.registered_token(), None);
    }

    #[test]
    fn test_browser_details_shape() {
        let value = serde_json::to_value(BrowserDetails::for_agent()).unwrap();
        assert!(value["userAgent"].as_str().unwrap().starts_with("suitestream-agent/"));
        assert!(value["screenWidth"].is_null());
        assert!(value["language"].is_null());
        assert!(value.get("timeZone").is_some());
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(
            ReqwestOnboardingApi::new("not a url", "http://x/connect"),
            Err(OnboardingError::InvalidUrl(_))
        ));
    }
}
