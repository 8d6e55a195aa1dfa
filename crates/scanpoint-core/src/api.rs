//! The remote ticketing service.
//!
//! [`TicketingApi`] is the seam between the scan core and the network. The
//! orchestrator only ever talks to the trait; [`HttpTicketingApi`] is the
//! production implementation over `reqwest`.
//!
//! Response shapes are dictated by the ticketing service and are taken as
//! given. In particular `msg` is sometimes a plain string and sometimes an
//! object with `message` and `info`; [`MessagePayload`] captures both.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{GroupTicket, Purchaser, TicketInfo};
use crate::validation::ValidationOutcome;

/// Default per-request timeout of the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw answer of the validation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Whether the backend rejected the code.
    #[serde(default)]
    pub error: bool,

    /// Status code reported in the body, if any.
    #[serde(default)]
    pub status: Option<u16>,

    /// Message, either plain text or `{message, info}`.
    #[serde(default)]
    pub msg: Option<MessagePayload>,

    /// Ticket details some deployments put at the top level.
    #[serde(default)]
    pub info: Option<TicketInfo>,
}

/// The two shapes the `msg` field comes in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// A bare message string.
    Text(String),
    /// A message with attached ticket details.
    Detailed {
        /// Human readable message.
        #[serde(default)]
        message: Option<String>,
        /// Ticket the message is about.
        #[serde(default)]
        info: Option<TicketInfo>,
    },
}

/// Raw answer of the group booking endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBookingResponse {
    /// Whether the lookup failed.
    #[serde(default)]
    pub error: bool,

    /// Tickets in the booking.
    #[serde(default)]
    pub tickets: Vec<GroupTicket>,

    /// Booking owner.
    #[serde(default)]
    pub purchaser: Option<Purchaser>,
}

/// Operations the scan core needs from the ticketing service.
#[async_trait]
pub trait TicketingApi: Send + Sync {
    /// Validates `code` for `event_id`.
    async fn validate_code(
        &self,
        event_id: &str,
        code: &str,
    ) -> Result<ValidationResponse, ApiError>;

    /// Looks up the booking `code` belongs to.
    ///
    /// `validation` is the outcome of validating the same code and may carry
    /// the booking id.
    async fn fetch_group_booking(
        &self,
        event_id: &str,
        code: &str,
        validation: &ValidationOutcome,
    ) -> Result<GroupBookingResponse, ApiError>;

    /// Records a check-in for `code`.
    async fn record_check_in(&self, event_id: &str, code: &str) -> Result<(), ApiError>;

    /// Records a check-out for `code`.
    async fn record_check_out(&self, event_id: &str, code: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
}

/// [`TicketingApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTicketingApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTicketingApi {
    /// Creates a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
        })
    }

    /// Creates a client from the `[api]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL is invalid, or an API
    /// error if the HTTP client cannot be built.
    pub fn from_config(config: &ApiConfig) -> crate::Result<Self> {
        let base_url = config.parsed_base_url()?;
        Ok(Self::new(base_url, config.request_timeout())?)
    }

    /// The root every endpoint is resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn event_url(&self, event_id: &str, endpoint: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["events", event_id, endpoint]);
        Ok(url)
    }

    async fn post_code(&self, event_id: &str, endpoint: &str, code: &str) -> Result<(), ApiError> {
        let url = self.event_url(event_id, endpoint)?;
        let resp = self
            .client
            .post(url)
            .json(&CodeRequest { code })
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Parses a body that is meaningful regardless of HTTP status.
///
/// The ticketing service reports rejections as JSON with a 4xx status, so the
/// body is decoded first and the HTTP status only matters when it does not
/// decode.
fn decode_body<T: serde::de::DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ApiError> {
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(ApiError::UnexpectedStatus {
            status: status.as_u16(),
            body: body.to_owned(),
        }),
        Err(err) => Err(ApiError::Decode(err)),
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl TicketingApi for HttpTicketingApi {
    async fn validate_code(
        &self,
        event_id: &str,
        code: &str,
    ) -> Result<ValidationResponse, ApiError> {
        let url = self.event_url(event_id, "validate")?;
        debug!(%url, "validating code");

        let resp = self
            .client
            .post(url)
            .json(&CodeRequest { code })
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        let mut parsed: ValidationResponse = decode_body(status, &body)?;
        if parsed.status.is_none() {
            parsed.status = Some(status.as_u16());
        }
        Ok(parsed)
    }

    async fn fetch_group_booking(
        &self,
        event_id: &str,
        code: &str,
        validation: &ValidationOutcome,
    ) -> Result<GroupBookingResponse, ApiError> {
        let mut url = self.event_url(event_id, "bookings")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", code);
            if let Some(booking_id) = validation.ticket_info().and_then(|i| i.booking_id.as_deref()) {
                query.append_pair("booking_id", booking_id);
            }
        }
        debug!(%url, "fetching group booking");

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        decode_body(status, &body)
    }

    async fn record_check_in(&self, event_id: &str, code: &str) -> Result<(), ApiError> {
        self.post_code(event_id, "check-in", code).await
    }

    async fn record_check_out(&self, event_id: &str, code: &str) -> Result<(), ApiError> {
        self.post_code(event_id, "check-out", code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpTicketingApi {
        HttpTicketingApi::new(Url::parse(base).unwrap(), DEFAULT_REQUEST_TIMEOUT).unwrap()
    }

    #[test]
    fn test_from_config() {
        let config = ApiConfig {
            base_url: "https://tickets.example.com/api".into(),
            ..ApiConfig::default()
        };
        let api = HttpTicketingApi::from_config(&config).unwrap();
        assert_eq!(api.base_url().as_str(), "https://tickets.example.com/api/");

        let config = ApiConfig {
            base_url: "not a url".into(),
            ..ApiConfig::default()
        };
        let err = HttpTicketingApi::from_config(&config).unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_event_url_joins_segments() {
        let api = api("https://tickets.example.com/api/v1");
        let url = api.event_url("ev-9", "validate").unwrap();
        assert_eq!(url.as_str(), "https://tickets.example.com/api/v1/events/ev-9/validate");
    }

    #[test]
    fn test_event_url_escapes_event_id() {
        let api = api("https://tickets.example.com/");
        let url = api.event_url("a b/c", "bookings").unwrap();
        assert_eq!(url.as_str(), "https://tickets.example.com/events/a%20b%2Fc/bookings");
    }

    #[test]
    fn test_validation_response_with_text_message() {
        let json = r#"{"error": true, "status": 409, "msg": "Ticket already checked in"}"#;
        let resp: ValidationResponse = serde_json::from_str(json).unwrap();
        assert!(resp.error);
        assert_eq!(resp.status, Some(409));
        assert_eq!(
            resp.msg,
            Some(MessagePayload::Text("Ticket already checked in".into()))
        );
    }

    #[test]
    fn test_validation_response_with_detailed_message() {
        let json = r#"{
            "error": false,
            "status": 200,
            "msg": {"message": "OK", "info": {"id": 5, "name": "Jane Doe", "checkedin": 0}}
        }"#;
        let resp: ValidationResponse = serde_json::from_str(json).unwrap();
        match resp.msg {
            Some(MessagePayload::Detailed { message, info }) => {
                assert_eq!(message.as_deref(), Some("OK"));
                let info = info.unwrap();
                assert_eq!(info.name.as_deref(), Some("Jane Doe"));
                assert!(!info.checked_in);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_body_prefers_json_over_status() {
        let resp: ValidationResponse =
            decode_body(StatusCode::CONFLICT, r#"{"error": true, "msg": "already"}"#).unwrap();
        assert!(resp.error);

        let err = decode_body::<ValidationResponse>(StatusCode::BAD_GATEWAY, "<html>").unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedStatus { status: 502, .. }));

        let err = decode_body::<ValidationResponse>(StatusCode::OK, "<html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_group_booking_response() {
        let json = r#"{
            "error": false,
            "purchaser": {"email": "jane@example.com", "name": "Jane Doe", "bookingId": 88},
            "tickets": [
                {"id": 1, "name": "Jane Doe", "ticketIdentifier": "T1", "isCheckedIn": 1, "qrCode": "Q1"},
                {"id": "2", "name": "John Doe", "ticketIdentifier": "T2", "isCheckedIn": false, "qrCode": "Q2"}
            ]
        }"#;
        let resp: GroupBookingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.tickets.len(), 2);
        assert!(resp.tickets[0].is_checked_in);
        assert_eq!(resp.tickets[1].id, "2");
        assert_eq!(resp.purchaser.unwrap().booking_id, "88");
    }
}
