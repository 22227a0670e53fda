use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;

use super::RawEventSource;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Drives an agent over a Server-Sent Events stream from a sidecar proxy —
/// the `claude-python-proxy` transport. Frames are delimited by a blank
/// line; within a frame only the `data:` field carries the payload this
/// runner forwards, matching the subset of the SSE spec actual proxies
/// emit.
pub struct SseProxySource {
    lines: mpsc::Receiver<OrchestratorResult<String>>,
    stopped: bool,
}

impl SseProxySource {
    pub async fn connect(url: &str) -> OrchestratorResult<Self> {
        let client = Client::new();
        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| OrchestratorError::RunnerStartFailure {
                agent_id: url.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(pump_sse_frames(response, tx));

        Ok(Self {
            lines: rx,
            stopped: false,
        })
    }
}

async fn pump_sse_frames(response: reqwest::Response, tx: mpsc::Sender<OrchestratorResult<String>>) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

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
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..pos + 2).collect();
            if let Some(data) = extract_data_field(&frame) {
                if tx.send(Ok(data)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn extract_data_field(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[async_trait]
impl RawEventSource for SseProxySource {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_line_data_field() {
        let frame = "event: message\ndata: {\"type\":\"ping\"}\n\n";
        assert_eq!(
            extract_data_field(frame),
            Some(r#"{"type":"ping"}"#.to_string())
        );
    }

    #[test]
    fn joins_multi_line_data_field() {
        let frame = "data: line one\ndata: line two\n\n";
        assert_eq!(
            extract_data_field(frame),
            Some("line one\nline two".to_string())
        );
    }

    #[test]
    fn frame_without_data_field_yields_none() {
        let frame = "event: ping\n\n";
        assert_eq!(extract_data_field(frame), None);
    }
}
