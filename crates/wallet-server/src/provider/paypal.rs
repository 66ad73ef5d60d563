//! PayPal Orders v2 client.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{
    CaptureDetails, CaptureStatus, CreatedOrder, ProviderClient, ProviderError, ProviderOrder,
    ProviderOrderStatus,
};
use crate::models::ProviderKind;

/// Tokens are refreshed this long before the provider-reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Longest provider body kept in a `NonJson` error.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the PayPal REST API.
#[derive(Debug, Clone)]
pub struct PaypalConfig {
    /// `https://api-m.sandbox.paypal.com` or `https://api-m.paypal.com`.
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    /// Public base URL of the panel; checkout returns to `{base}/wallet`.
    pub return_base_url: String,
    /// Upper bound for every outbound call.
    pub timeout: Duration,
}

#[derive(Debug)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// PayPal client. The OAuth token is cached; the async mutex is held across
/// a refresh so concurrent callers share one token request.
pub struct PaypalClient {
    http: reqwest::Client,
    config: PaypalConfig,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrderBody {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<LinkBody>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitBody>,
}

#[derive(Debug, Deserialize)]
struct LinkBody {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnitBody {
    #[serde(default)]
    payments: Option<PaymentsBody>,
}

#[derive(Debug, Deserialize)]
struct PaymentsBody {
    #[serde(default)]
    captures: Vec<CaptureBody>,
}

#[derive(Debug, Deserialize)]
struct CaptureBody {
    id: String,
    status: String,
    amount: MoneyBody,
}

#[derive(Debug, Deserialize)]
struct MoneyBody {
    currency_code: String,
    value: String,
}

impl PaypalClient {
    pub fn new(config: PaypalConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let body = read_json(response).await?;
        let token: TokenBody = decode_body(body)?;

        tracing::debug!(expires_in = token.expires_in, "Refreshed PayPal access token");
        let value = token.access_token.clone();
        *cached = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{}", order_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        match read_json(response).await {
            Ok(body) => parse_order(body),
            Err(e) if e.is_not_found() => Ok(ProviderOrder::not_found(order_id)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ProviderClient for PaypalClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn create_order(
        &self,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<CreatedOrder, ProviderError> {
        let token = self.access_token().await?;
        let body = create_order_body(amount, currency, &self.config.return_base_url);

        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let order: OrderBody = decode_body(read_json(response).await?)?;

        let approve_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone())
            .ok_or_else(|| malformed(format!("order {} has no approve link", order.id)))?;

        Ok(CreatedOrder {
            order_id: order.id,
            approve_url,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError> {
        self.fetch_order(order_id).await
    }

    async fn capture_order(&self, order_id: &str) -> Result<ProviderOrder, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", order_id)))
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("capture-{}", order_id))
            .header("Prefer", "return=representation")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        match read_json(response).await {
            Ok(body) => parse_order(body),
            Err(e) if e.is_already_captured() => {
                tracing::info!(order_id, "Order already captured at provider, re-reading");
                self.fetch_order(order_id).await
            }
            Err(e) => Err(e),
        }
    }
}

fn create_order_body(amount: &BigDecimal, currency: &str, return_base_url: &str) -> Value {
    let base = return_base_url.trim_end_matches('/');
    json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "amount": {
                "currency_code": currency,
                "value": format_amount(amount),
            }
        }],
        "application_context": {
            "return_url": format!("{}/wallet?status=success", base),
            "cancel_url": format!("{}/wallet?status=cancel", base),
            "shipping_preference": "NO_SHIPPING",
            "user_action": "PAY_NOW",
        }
    })
}

/// Formats an amount with the two decimals the provider expects.
fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

fn malformed(message: String) -> ProviderError {
    ProviderError::Provider {
        name: "MALFORMED_RESPONSE".to_string(),
        message,
        issue: None,
        raw: Value::Null,
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;
    decode_response(status, &bytes)
}

/// Classifies a raw provider response into JSON or one of the error kinds.
fn decode_response(status: StatusCode, bytes: &[u8]) -> Result<Value, ProviderError> {
    let body: Value = match serde_json::from_slice(bytes) {
        Ok(body) => body,
        Err(_) => {
            let text = String::from_utf8_lossy(bytes);
            return Err(ProviderError::NonJson {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
    };

    if status.is_success() {
        return Ok(body);
    }

    // Orders API errors carry `name`; OAuth errors carry `error`.
    let name = body
        .get("name")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
    let message = body
        .get("message")
        .or_else(|| body.get("error_description"))
        .and_then(Value::as_str)
        .unwrap_or("no message")
        .to_string();
    let issue = body
        .pointer("/details/0/issue")
        .and_then(Value::as_str)
        .map(str::to_string);

    Err(ProviderError::Provider {
        name,
        message,
        issue,
        raw: body,
    })
}

fn decode_body<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, ProviderError> {
    serde_json::from_value(body.clone()).map_err(|e| ProviderError::Provider {
        name: "MALFORMED_RESPONSE".to_string(),
        message: e.to_string(),
        issue: None,
        raw: body,
    })
}

fn parse_order(body: Value) -> Result<ProviderOrder, ProviderError> {
    let order: OrderBody = decode_body(body)?;
    let status = ProviderOrderStatus::parse(&order.status)
        .ok_or_else(|| malformed(format!("unknown order status {}", order.status)))?;

    let capture = order
        .purchase_units
        .iter()
        .filter_map(|unit| unit.payments.as_ref())
        .flat_map(|payments| payments.captures.iter())
        .next()
        .map(parse_capture)
        .transpose()?;

    Ok(ProviderOrder {
        order_id: order.id,
        status,
        capture,
    })
}

fn parse_capture(capture: &CaptureBody) -> Result<CaptureDetails, ProviderError> {
    let status = CaptureStatus::parse(&capture.status)
        .ok_or_else(|| malformed(format!("unknown capture status {}", capture.status)))?;
    let amount = BigDecimal::from_str(&capture.amount.value)
        .map_err(|e| malformed(format!("invalid capture amount: {}", e)))?;

    Ok(CaptureDetails {
        capture_id: capture.id.clone(),
        status,
        amount,
        currency: capture.amount.currency_code.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_two_decimals() {
        assert_eq!(format_amount(&BigDecimal::from_str("10").unwrap()), "10.00");
        assert_eq!(format_amount(&BigDecimal::from_str("10.5").unwrap()), "10.50");
    }

    #[test]
    fn test_create_order_body() {
        let body = create_order_body(
            &BigDecimal::from_str("10.00").unwrap(),
            "EUR",
            "https://panel.example.com/",
        );
        assert_eq!(body["intent"], "CAPTURE");
        assert_eq!(body["purchase_units"][0]["amount"]["value"], "10.00");
        assert_eq!(body["purchase_units"][0]["amount"]["currency_code"], "EUR");
        assert_eq!(
            body["application_context"]["return_url"],
            "https://panel.example.com/wallet?status=success"
        );
        assert_eq!(
            body["application_context"]["cancel_url"],
            "https://panel.example.com/wallet?status=cancel"
        );
    }

    #[test]
    fn test_decode_non_json_body() {
        let err = decode_response(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ProviderError::NonJson { status: 502, .. }));
    }

    #[test]
    fn test_decode_business_error() {
        let body = br#"{
            "name": "UNPROCESSABLE_ENTITY",
            "message": "The requested action could not be performed.",
            "details": [{"issue": "ORDER_ALREADY_CAPTURED"}]
        }"#;
        let err = decode_response(StatusCode::UNPROCESSABLE_ENTITY, body).unwrap_err();
        assert!(err.is_already_captured());
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }

    #[test]
    fn test_decode_oauth_error() {
        let body = br#"{"error": "invalid_client", "error_description": "Client Authentication failed"}"#;
        match decode_response(StatusCode::UNAUTHORIZED, body).unwrap_err() {
            ProviderError::Provider { name, message, .. } => {
                assert_eq!(name, "invalid_client");
                assert_eq!(message, "Client Authentication failed");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_success() {
        let value = decode_response(StatusCode::OK, br#"{"id": "PAY-1"}"#).unwrap();
        assert_eq!(value["id"], "PAY-1");
    }

    #[test]
    fn test_parse_captured_order() {
        let body = json!({
            "id": "PAY-1",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": {
                    "captures": [{
                        "id": "CAP-9",
                        "status": "COMPLETED",
                        "amount": {"currency_code": "EUR", "value": "10.00"}
                    }]
                }
            }]
        });
        let order = parse_order(body).unwrap();
        assert_eq!(order.status, ProviderOrderStatus::Completed);
        let capture = order.capture.unwrap();
        assert_eq!(capture.capture_id, "CAP-9");
        assert_eq!(capture.status, CaptureStatus::Completed);
        assert_eq!(capture.amount, BigDecimal::from_str("10.00").unwrap());
        assert_eq!(capture.currency, "EUR");
    }

    #[test]
    fn test_parse_approved_order_without_capture() {
        let body = json!({
            "id": "PAY-2",
            "status": "APPROVED",
            "links": [{"href": "https://www.paypal.com/checkoutnow?token=PAY-2", "rel": "approve"}]
        });
        let order = parse_order(body).unwrap();
        assert_eq!(order.status, ProviderOrderStatus::Approved);
        assert!(order.capture.is_none());
    }

    #[test]
    fn test_parse_order_unknown_status() {
        let err = parse_order(json!({"id": "PAY-3", "status": "MYSTERY"})).unwrap_err();
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }

    #[test]
    fn test_parse_order_bad_shape() {
        let err = parse_order(json!({"status": "APPROVED"})).unwrap_err();
        assert!(matches!(err, ProviderError::Provider { ref name, .. } if name == "MALFORMED_RESPONSE"));
    }
}
