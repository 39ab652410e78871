//! `http_request` node — outbound HTTP call.
//!
//! `url`, headers, query params, and a string body are all template
//! rendered before the call. A JSON `data` value is sent as a JSON body; a
//! string `data` is sent as raw text. Never raises on a non-2xx status —
//! `success` is simply `status_code < 400`, leaving branch logic downstream
//! to a `condition` node.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::kinds::config_str;
use crate::template::{self, Namespaces};
use crate::{ExecutableNode, ExecutionContext, NodeError};

fn render_str(s: &str, ns: Namespaces) -> String {
    template::render(s, ns)
}

fn render_map(map: &Map<String, Value>, ns: Namespaces) -> Vec<(String, String)> {
    map.iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => render_str(s, ns),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

pub struct HttpRequestNode;

#[async_trait]
impl ExecutableNode for HttpRequestNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let raw_url = input
            .get("url")
            .and_then(|v| v.as_str())
            .or_else(|| config_str(config, "url"))
            .ok_or_else(|| NodeError::Fatal("http_request node: missing required field 'url'".into()))?;

        let ns = Namespaces {
            data: &input,
            input: &ctx.input,
            context: &ctx.global_context,
        };
        let url = render_str(raw_url, ns);

        let method = match config_str(config, "method").unwrap_or("GET").to_ascii_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            _ => Method::GET,
        };

        let timeout_secs = config.get("timeout_seconds").and_then(|v| v.as_f64()).unwrap_or(30.0);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_secs.max(0.1)))
            .build()
            .map_err(|e| NodeError::Fatal(format!("http_request node: client build failed: {e}")))?;

        let mut builder = client.request(method, &url);

        if let Some(headers) = config.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in render_map(headers, ns) {
                builder = builder.header(k, v);
            }
        }

        if let Some(params) = config.get("params").and_then(|v| v.as_object()) {
            builder = builder.query(&render_map(params, ns));
        }

        match input.get("data") {
            Some(Value::String(s)) => {
                builder = builder.body(render_str(s, ns));
            }
            Some(data) if !data.is_null() => {
                builder = builder.json(data);
            }
            _ => {}
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NodeError::Classified {
                kind: if e.is_timeout() {
                    crate::ErrorKind::Timeout
                } else {
                    crate::ErrorKind::Network
                },
                message: format!("http_request failed: {e}"),
            })?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::Retryable(format!("http_request: failed to read response body: {e}")))?;
        let response_data = serde_json::from_str::<Value>(&body_text).unwrap_or(Value::String(body_text));

        Ok(json!({
            "status_code": status,
            "response_data": response_data,
            "headers": Value::Object(headers),
            "success": status < 400,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::config_str as cfg_str;

    #[test]
    fn method_defaults_to_get() {
        assert_eq!(cfg_str(&Value::Null, "method"), None);
    }
}
