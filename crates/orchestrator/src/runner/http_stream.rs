use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;

use super::RawEventSource;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Drives an agent over a chunked/NDJSON HTTP response body — the
/// `claude-sdk` transport. The response is read on a background task that
/// splits the byte stream on newlines and forwards complete lines over a
/// channel, so `next_line` stays a simple `recv`.
pub struct HttpStreamSource {
    lines: mpsc::Receiver<OrchestratorResult<String>>,
    stopped: bool,
}

impl HttpStreamSource {
    pub async fn connect(url: &str, body: serde_json::Value) -> OrchestratorResult<Self> {
        let client = Client::new();
        let response = client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::RunnerStartFailure {
                agent_id: url.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(pump_lines(response, tx));

        Ok(Self {
            lines: rx,
            stopped: false,
        })
    }
}

async fn pump_lines(response: reqwest::Response, tx: mpsc::Sender<OrchestratorResult<String>>) {
    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(Err(OrchestratorError::RunnerStreamError {
                        agent_id: String::new(),
                        reason: e.to_string(),
                    }))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            if tx.send(Ok(line)).await.is_err() {
                return;
            }
        }
    }

    if !buffer.is_empty() {
        let line = String::from_utf8_lossy(&buffer).into_owned();
        let _ = tx.send(Ok(line)).await;
    }
}

#[async_trait]
impl RawEventSource for HttpStreamSource {
    async fn next_line(&mut self) -> OrchestratorResult<Option<String>> {
        if self.stopped {
            return Ok(None);
        }
        match self.lines.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn stop(&mut self) -> OrchestratorResult<()> {
        self.stopped = true;
        self.lines.close();
        Ok(())
    }
}
