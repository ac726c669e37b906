//! JSON-over-HTTP provider client
//!
//! Every endpoint answers with `{status, provider_ref?, reason?}`. Transport
//! errors, 5xx, 408/429 and unreadable bodies are ambiguous. On commands,
//! auth and routing errors (401/403/404/405/407) are ambiguous as well and
//! other 4xx are explicit failures. A status query only fails when the body
//! itself says the transfer failed.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BeneficiaryCheck, ProviderGateway, ProviderOutcome, TransferLookup, TransferPayload};
use crate::error::{Result, WalletError};

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// Body shared by every provider answer
#[derive(Debug, Deserialize)]
struct ProviderReply {
    status: String,
    #[serde(default)]
    provider_ref: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTransferBody<'a> {
    idempotency_key: &'a str,
    #[serde(flatten)]
    payload: &'a TransferPayload,
}

#[derive(Serialize)]
struct OtpBody<'a> {
    mobile: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<&'a str>,
}

#[derive(Serialize)]
struct KycBody<'a> {
    mobile: &'a str,
    document: &'a serde_json::Value,
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("provider client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
        interpret: fn(StatusCode, &str) -> ProviderOutcome,
    ) -> ProviderOutcome {
        let response = match self.authorize(request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(op, error = %e, "Provider transport error, outcome unknown");
                return ProviderOutcome::unknown();
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(op, http_status = status.as_u16(), error = %e, "Provider body unreadable");
                return ProviderOutcome::unknown();
            }
        };
        let outcome = interpret(status, &body);
        debug!(op, http_status = status.as_u16(), ?outcome, "Provider answered");
        outcome
    }
}

fn is_ambiguous(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Rejections that say nothing about the request itself
fn is_access_error(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::METHOD_NOT_ALLOWED
            | StatusCode::PROXY_AUTHENTICATION_REQUIRED
    )
}

/// Map a command answer onto the explicit-fail rule
fn interpret(status: StatusCode, body: &str) -> ProviderOutcome {
    if is_ambiguous(status) || is_access_error(status) {
        return ProviderOutcome::unknown();
    }
    let reply = serde_json::from_str::<ProviderReply>(body).ok();

    if status.is_client_error() {
        let reason = reply
            .and_then(|r| r.reason)
            .unwrap_or_else(|| format!("provider returned HTTP {}", status.as_u16()));
        return ProviderOutcome::failed(reason);
    }
    match reply {
        Some(reply) => from_reply(reply),
        None => ProviderOutcome::unknown(),
    }
}

/// Map a status-query answer. A 4xx on a lookup is about the lookup, not the
/// transfer, so only an explicit failed body counts.
fn interpret_query(status: StatusCode, body: &str) -> ProviderOutcome {
    if is_ambiguous(status) {
        return ProviderOutcome::unknown();
    }
    let Ok(reply) = serde_json::from_str::<ProviderReply>(body) else {
        return ProviderOutcome::unknown();
    };
    if status.is_client_error() {
        return match reply.status.to_ascii_lowercase().as_str() {
            "failed" | "rejected" => from_reply(reply),
            _ => ProviderOutcome::Pending {
                provider_ref: reply.provider_ref,
            },
        };
    }
    from_reply(reply)
}

fn from_reply(reply: ProviderReply) -> ProviderOutcome {
    match reply.status.to_ascii_lowercase().as_str() {
        "success" | "completed" => match reply.provider_ref {
            Some(provider_ref) => ProviderOutcome::success(provider_ref),
            None => ProviderOutcome::unknown(),
        },
        "failed" | "rejected" => {
            ProviderOutcome::failed(reply.reason.unwrap_or_else(|| "rejected by provider".into()))
        }
        _ => ProviderOutcome::Pending {
            provider_ref: reply.provider_ref,
        },
    }
}

#[async_trait]
impl ProviderGateway for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit_transfer(
        &self,
        key: &str,
        payload: &TransferPayload,
    ) -> Result<ProviderOutcome> {
        let body = SubmitTransferBody {
            idempotency_key: key,
            payload,
        };
        let request = self.client.post(self.url("/transfers")).json(&body);
        Ok(self.send("submit_transfer", request, interpret).await)
    }

    async fn query_transfer(&self, lookup: &TransferLookup) -> Result<ProviderOutcome> {
        let request = match lookup {
            TransferLookup::ProviderRef(reference) => {
                self.client.get(self.url(&format!("/transfers/{}", reference)))
            }
            TransferLookup::IdempotencyKey(key) => self
                .client
                .get(self.url("/transfers"))
                .query(&[("idempotencyKey", key.as_str())]),
        };
        Ok(self.send("query_transfer", request, interpret_query).await)
    }

    async fn send_otp(&self, mobile: &str) -> Result<ProviderOutcome> {
        let body = OtpBody { mobile, otp: None };
        let request = self.client.post(self.url("/otp/send")).json(&body);
        Ok(self.send("send_otp", request, interpret).await)
    }

    async fn verify_otp(&self, mobile: &str, otp: &str) -> Result<ProviderOutcome> {
        let body = OtpBody {
            mobile,
            otp: Some(otp),
        };
        let request = self.client.post(self.url("/otp/verify")).json(&body);
        Ok(self.send("verify_otp", request, interpret).await)
    }

    async fn verify_kyc(
        &self,
        mobile: &str,
        payload: &serde_json::Value,
    ) -> Result<ProviderOutcome> {
        let body = KycBody {
            mobile,
            document: payload,
        };
        let request = self.client.post(self.url("/kyc")).json(&body);
        Ok(self.send("verify_kyc", request, interpret).await)
    }

    async fn verify_beneficiary(&self, check: &BeneficiaryCheck) -> Result<ProviderOutcome> {
        let request = self
            .client
            .post(self.url("/beneficiaries/verify"))
            .json(check);
        Ok(self.send("verify_beneficiary", request, interpret).await)
    }
}
