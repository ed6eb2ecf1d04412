use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use larder_protocol::ChangeEvent;
use larder_protocol::frame::{DecodedFrame, FrameDecoder};

/// HTTP client for one household member.
pub struct TestClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl TestClient {
    pub fn new(base: &str, token: &str) -> Self {
        Self::with_user_agent(base, token, "larder-tests")
    }

    /// The user agent feeds the identity key, so tests can model distinct
    /// tabs/devices for the same subject.
    pub fn with_user_agent(base: &str, token: &str, user_agent: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base: base.to_string(),
            token: token.to_string(),
        }
    }

    pub async fn status(&self) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/api/status", self.base))
            .send()
            .await?;
        ensure!(resp.status().is_success(), "status failed: {}", resp.status());
        Ok(resp.json().await?)
    }

    pub async fn connection_count(&self) -> Result<u64> {
        let status = self.status().await?;
        status["connections"]
            .as_u64()
            .context("status missing connections")
    }

    pub async fn create_list(&self, name: &str) -> Result<Value> {
        self.post("/api/lists", json!({ "name": name })).await
    }

    pub async fn get_list(&self, list_id: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/api/lists/{list_id}", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        ensure!(resp.status().is_success(), "get_list failed: {}", resp.status());
        Ok(resp.json().await?)
    }

    pub async fn add_item(&self, list_id: &str, name: &str) -> Result<Value> {
        self.post(&format!("/api/lists/{list_id}/items"), json!({ "name": name }))
            .await
    }

    pub async fn set_item_state(&self, list_id: &str, item_id: &str, state: &str) -> Result<Value> {
        let resp = self
            .http
            .patch(format!("{}/api/lists/{list_id}/items/{item_id}", self.base))
            .bearer_auth(&self.token)
            .json(&json!({ "state": state }))
            .send()
            .await?;
        ensure!(
            resp.status().is_success(),
            "set_item_state failed: {}",
            resp.status()
        );
        Ok(resp.json().await?)
    }

    pub async fn remove_item(&self, list_id: &str, item_id: &str) -> Result<Value> {
        let resp = self
            .http
            .delete(format!("{}/api/lists/{list_id}/items/{item_id}", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        ensure!(
            resp.status().is_success(),
            "remove_item failed: {}",
            resp.status()
        );
        Ok(resp.json().await?)
    }

    /// Open the event stream; fails on a non-success handshake.
    pub async fn open_events(&self) -> Result<EventStream> {
        let resp = self
            .http
            .get(format!("{}/api/events", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("event stream handshake rejected: {}", resp.status());
        }
        Ok(EventStream::new(resp))
    }

    /// Handshake status only, for auth tests.
    pub async fn events_status(&self) -> Result<u16> {
        let resp = self
            .http
            .get(format!("{}/api/events", self.base))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        ensure!(resp.status().is_success(), "{path} failed: {}", resp.status());
        Ok(resp.json().await?)
    }
}

/// A decoded view over one live event stream.
pub struct EventStream {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: FrameDecoder,
    pending: VecDeque<DecodedFrame>,
    ended: bool,
}

impl EventStream {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            body: resp.bytes_stream().boxed(),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            ended: false,
        }
    }

    /// Next decoded frame, or `None` when the deadline passes or the
    /// stream ends.
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<DecodedFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.ended {
                return None;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.body.next()).await {
                Ok(Some(Ok(chunk))) => self.pending.extend(self.decoder.push(&chunk)),
                Ok(Some(Err(_))) | Ok(None) => self.ended = true,
                Err(_) => return None,
            }
        }
    }

    /// Next change event, skipping heartbeats and malformed records.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<ChangeEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_frame(remaining).await? {
                DecodedFrame::Event(event) => return Some(event),
                DecodedFrame::Comment | DecodedFrame::Invalid(_) => continue,
            }
        }
    }

    /// Whether the server closes this stream within the deadline.
    pub async fn closed(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ended {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, self.body.next()).await {
                Ok(Some(Ok(chunk))) => self.pending.extend(self.decoder.push(&chunk)),
                Ok(Some(Err(_))) | Ok(None) => self.ended = true,
                Err(_) => return false,
            }
        }
    }
}
