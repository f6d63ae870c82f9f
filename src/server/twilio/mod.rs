//! Twilio REST API client for inbound call logs

use chrono::{DateTime, Datelike, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::TwilioConfig;
use crate::models::CompletedCall;
use super::retry::{is_retryable_status, Retryable};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const PAGE_SIZE: &str = "100";

#[derive(Error, Debug)]
pub enum TwilioError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Retryable for TwilioError {
    fn is_retryable(&self) -> bool {
        match self {
            TwilioError::Network(_) => true,
            TwilioError::Api { status, .. } => is_retryable_status(*status),
            TwilioError::Parse(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    phone_number: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CallsPage {
    #[serde(default)]
    calls: Vec<CallRecord>,
    next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallRecord {
    sid: String,
    from: String,
    to: String,
    status: String,
    duration: Option<String>,
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    message: String,
}

impl CallRecord {
    fn into_completed_call(self) -> CompletedCall {
        CompletedCall {
            duration: self.duration.as_deref().and_then(|d| d.parse().ok()),
            // Twilio reports times in RFC 2822, e.g. "Tue, 10 Aug 2010 08:02:17 +0000"
            start_time: self
                .start_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            from: self.from,
            to: self.to,
            status: self.status,
            sid: self.sid,
        }
    }
}

impl TwilioClient {
    pub fn new(config: &TwilioConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(config: &TwilioConfig, base_url: String) -> Self {
        Self {
            client: Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            phone_number: config.phone_number.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    async fn get_page(&self, request: reqwest::RequestBuilder) -> Result<CallsPage, TwilioError> {
        let response = request
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TwilioError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TwilioError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<TwilioErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(TwilioError::Api { status: status.as_u16(), message });
        }

        serde_json::from_str(&body).map_err(|e| TwilioError::Parse(e.to_string()))
    }

    /// All completed calls to the configured number, following pagination
    pub async fn completed_calls(&self) -> Result<Vec<CompletedCall>, TwilioError> {
        let first = self
            .client
            .get(format!(
                "{}/2010-04-01/Accounts/{}/Calls.json",
                self.base_url, self.account_sid
            ))
            .query(&[
                ("To", self.phone_number.as_str()),
                ("Status", "completed"),
                ("PageSize", PAGE_SIZE),
            ]);

        let mut page = self.get_page(first).await?;
        let mut calls: Vec<CompletedCall> = Vec::new();

        loop {
            calls.extend(page.calls.into_iter().map(CallRecord::into_completed_call));

            match page.next_page_uri {
                Some(uri) if !uri.is_empty() => {
                    let next = self.client.get(format!("{}{}", self.base_url, uri));
                    page = self.get_page(next).await?;
                }
                _ => break,
            }
        }

        tracing::debug!("Fetched {} completed calls from Twilio", calls.len());
        Ok(calls)
    }
}

/// Keep the completed calls that started in the same calendar month as `now`
pub fn in_month(calls: Vec<CompletedCall>, now: DateTime<Utc>) -> Vec<CompletedCall> {
    calls
        .into_iter()
        .filter(|call| call.status == "completed")
        .filter(|call| {
            call.start_time
                .map(|t| t.year() == now.year() && t.month() == now.month())
                .unwrap_or(false)
        })
        .collect()
}
