// Blocking HTTP client for the wallet server admin surface

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Request timeout for every admin call. A reconcile sweep runs
/// sequentially on the server, so this is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanWindow {
    minutes: i64,
    limit: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundBody<'a> {
    user_id: Uuid,
    amount: &'a str,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdjustBody<'a> {
    amount: &'a str,
    currency: &'a str,
    reason: &'a str,
    idempotency_key: &'a str,
}

pub struct AdminClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl AdminClient {
    pub fn new(server: &str, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            base_url: server.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        let mut request = self.authorized(self.agent.get(&url));
        for (key, value) in query {
            request = request.query(key, value);
        }
        read_response(&url, request.call())
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Value> {
        let url = self.url(path);
        let request = self.authorized(self.agent.post(&url));
        read_response(&url, request.send_json(body))
    }

    /// GET /admin/payments/{provider}/pending
    pub fn pending(&self, provider: &str, minutes: i64, limit: i64) -> Result<Value> {
        self.get(
            &format!("/admin/payments/{}/pending", provider),
            &[("minutes", minutes.to_string()), ("limit", limit.to_string())],
        )
    }

    /// POST /admin/payments/{provider}/capture/{orderId}
    pub fn capture(&self, provider: &str, order_id: &str) -> Result<Value> {
        self.post(
            &format!("/admin/payments/{}/capture/{}", provider, order_id),
            &serde_json::json!({}),
        )
    }

    /// POST /admin/payments/{provider}/reconcile
    pub fn reconcile(&self, provider: &str, minutes: i64, limit: i64) -> Result<Value> {
        self.post(
            &format!("/admin/payments/{}/reconcile", provider),
            &ScanWindow { minutes, limit },
        )
    }

    /// POST /admin/orders/{orderId}/refund
    pub fn refund(&self, order_id: &str, user_id: Uuid, amount: &str, currency: &str) -> Result<Value> {
        self.post(
            &format!("/admin/orders/{}/refund", order_id),
            &RefundBody {
                user_id,
                amount,
                currency,
            },
        )
    }

    /// POST /admin/wallets/{userId}/adjust
    pub fn adjust(
        &self,
        user_id: Uuid,
        amount: &str,
        currency: &str,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<Value> {
        self.post(
            &format!("/admin/wallets/{}/adjust", user_id),
            &AdjustBody {
                amount,
                currency,
                reason,
                idempotency_key,
            },
        )
    }

    /// GET /admin/wallets/{userId}/consistency
    pub fn consistency(&self, user_id: Uuid) -> Result<Value> {
        self.get(&format!("/admin/wallets/{}/consistency", user_id), &[])
    }

    /// GET /wallet/balance?userId=
    pub fn balance(&self, user_id: Uuid) -> Result<Value> {
        self.get("/wallet/balance", &[("userId", user_id.to_string())])
    }
}

fn read_response(url: &str, result: Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) => response
            .into_json()
            .map_err(|e| anyhow!("Invalid JSON from {}: {}", url, e)),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(anyhow!(describe_failure(status, &body)))
        }
        Err(ureq::Error::Transport(e)) => Err(anyhow!("Failed to reach {}: {}", url, e)),
    }
}

/// Renders a server error body `{ "error": code, "message": ... }`.
pub fn describe_failure(status: u16, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let code = json["error"].as_str().unwrap_or("UNKNOWN");
            let message = json["message"].as_str().unwrap_or("");
            format!("Server returned {} {}: {}", status, code, message)
        }
        Err(_) if body.trim().is_empty() => format!("Server returned {}", status),
        Err(_) => format!("Server returned {}: {}", status, body.trim()),
    }
}
