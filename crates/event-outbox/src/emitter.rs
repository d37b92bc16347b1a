//! Delivery primitives: one event per request, or a whole flush per request.

use crate::config::API_KEY_HEADER;
use crate::{EmitError, EmitResult, OutboxConfig, OutboxError, OutboxResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::time::Instant;
use tracing::debug;
use url::Url;

/// Sends stored payloads to the collector.
///
/// Success means the transport completed and the collector answered with a
/// status of 299 or lower.
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Deliver one payload in its own request.
    async fn send_one(&self, payload: &[u8]) -> EmitResult<()>;

    /// Deliver every payload in a single newline-joined request.
    async fn send_bulk(&self, payloads: &[&[u8]]) -> EmitResult<()>;
}

#[async_trait]
impl<E: Emitter + ?Sized> Emitter for Box<E> {
    async fn send_one(&self, payload: &[u8]) -> EmitResult<()> {
        (**self).send_one(payload).await
    }

    async fn send_bulk(&self, payloads: &[&[u8]]) -> EmitResult<()> {
        (**self).send_bulk(payloads).await
    }
}

/// HTTP emitter posting to the configured collector endpoint.
pub struct HttpEmitter {
    client: Client,
    endpoint: Url,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    debug: bool,
}

impl HttpEmitter {
    /// Build an emitter from the collector settings of `config`.
    pub fn new(config: &OutboxConfig) -> OutboxResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| OutboxError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| OutboxError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| OutboxError::Config(format!("invalid api_key: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(Self {
            client,
            endpoint: config.endpoint()?,
            headers,
            query: config
                .query_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            debug: config.debug,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Turn a completed response into the emit outcome.
    async fn check(&self, response: Response, started: Instant, kind: &str) -> EmitResult<()> {
        let status = response.status();
        if status.as_u16() > 299 {
            let body = response.text().await.unwrap_or_default();
            if self.debug {
                debug!(kind, status = status.as_u16(), body = %body, "Collector rejected request");
            }
            return Err(EmitError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if self.debug {
            debug!(
                kind,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Send complete"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Emitter for HttpEmitter {
    async fn send_one(&self, payload: &[u8]) -> EmitResult<()> {
        let started = Instant::now();

        let mut headers = self.headers.clone();
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .query(&self.query)
            .body(payload.to_vec())
            .send()
            .await?;

        self.check(response, started, "event").await
    }

    async fn send_bulk(&self, payloads: &[&[u8]]) -> EmitResult<()> {
        let started = Instant::now();
        let body = payloads.join(&b'\n');

        let form = Form::new().part("file", Part::bytes(body).file_name("file"));

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .query(&self.query)
            .multipart(form)
            .send()
            .await?;

        self.check(response, started, "bulk").await
    }
}
