//! Newline-delimited JSON-RPC 2.0 framing over a provider's stdio.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use super::SessionError;

const JSONRPC_VERSION: &str = "2.0";
const METHOD_NOT_FOUND: i64 = -32601;

/// One request/response channel. Requests are strictly sequential: a
/// request is written, then lines are read until the response with the same
/// id arrives.
#[derive(Debug)]
pub(crate) struct RpcChannel<W, R> {
    writer: Option<W>,
    lines: Lines<BufReader<R>>,
    next_id: u64,
}

impl<W, R> RpcChannel<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    pub(crate) fn new(writer: W, reader: R) -> Self {
        Self {
            writer: Some(writer),
            lines: BufReader::new(reader).lines(),
            next_id: 1,
        }
    }

    /// Send a request and wait for its result.
    pub(crate) async fn request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        tracing::trace!(method, id, "sending request");
        self.send(&json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let message = self.receive().await?;

            if let Some(server_method) = message.get("method").and_then(Value::as_str) {
                match message.get("id") {
                    Some(request_id) => {
                        self.answer_server_request(server_method, request_id.clone())
                            .await?
                    }
                    None => {
                        tracing::debug!(method = server_method, "ignoring provider notification")
                    }
                }
                continue;
            }

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                tracing::debug!(%message, "ignoring response with unexpected id");
                continue;
            }

            if let Some(error) = message.get("error") {
                return Err(SessionError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }

            return message.get("result").cloned().ok_or_else(|| {
                SessionError::Protocol(format!("response {id} has neither result nor error"))
            });
        }
    }

    /// Send a notification. No response is expected.
    pub(crate) async fn notify(&mut self, method: &str, params: Value) -> Result<(), SessionError> {
        self.send(&json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        }))
        .await
    }

    /// Drop the write half so the provider sees end of input.
    pub(crate) fn close_input(&mut self) {
        self.writer = None;
    }

    async fn answer_server_request(&mut self, method: &str, id: Value) -> Result<(), SessionError> {
        let reply = if method == "ping" {
            json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": {}})
        } else {
            tracing::debug!(method, "rejecting provider request");
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("method not supported: {method}"),
                },
            })
        };
        self.send(&reply).await
    }

    async fn send(&mut self, message: &Value) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::Closed)?;
        let mut line = serde_json::to_string(message)
            .map_err(|e| SessionError::Protocol(format!("failed to encode message: {e}")))?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await.map_err(SessionError::Transport)?;
        writer.flush().await.map_err(SessionError::Transport)
    }

    async fn receive(&mut self) -> Result<Value, SessionError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(SessionError::Transport)?
                .ok_or(SessionError::Closed)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map_err(|e| SessionError::Protocol(format!("provider wrote invalid JSON: {e}")));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// A client channel plus the provider's ends of the two pipes.
    fn pair() -> (
        RpcChannel<DuplexStream, DuplexStream>,
        Lines<BufReader<DuplexStream>>,
        DuplexStream,
    ) {
        let (client_out, provider_in) = duplex(4096);
        let (provider_out, client_in) = duplex(4096);
        (
            RpcChannel::new(client_out, client_in),
            BufReader::new(provider_in).lines(),
            provider_out,
        )
    }

    async fn read(lines: &mut Lines<BufReader<DuplexStream>>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn reply(out: &mut DuplexStream, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        out.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_skips_noise_until_matching_id() {
        let (mut channel, mut provider_in, mut provider_out) = pair();

        let provider = tokio::spawn(async move {
            let request = read(&mut provider_in).await;
            assert_eq!(request["method"], "tools/list");
            assert_eq!(request["id"], 1);

            reply(
                &mut provider_out,
                json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
            )
            .await;
            provider_out.write_all(b"\n").await.unwrap();
            reply(&mut provider_out, json!({"jsonrpc": "2.0", "id": 99, "result": {}})).await;
            reply(
                &mut provider_out,
                json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}),
            )
            .await;
        });

        let result = channel.request("tools/list", json!({})).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_response_and_ping() {
        let (mut channel, mut provider_in, mut provider_out) = pair();

        let provider = tokio::spawn(async move {
            let _request = provider_in.next_line().await.unwrap().unwrap();
            reply(
                &mut provider_out,
                json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}),
            )
            .await;
            let pong = read(&mut provider_in).await;
            assert_eq!(pong["id"], "srv-1");
            assert_eq!(pong["result"], json!({}));

            reply(
                &mut provider_out,
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": -32602, "message": "bad params"},
                }),
            )
            .await;
        });

        let err = channel.request("tools/call", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rpc {
                code: -32602,
                ref message,
            } if message == "bad params"
        ));
        assert!(!err.is_connection_error());
        provider.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_and_garbage_are_connection_errors() {
        let (mut channel, _provider_in, provider_out) = pair();
        drop(provider_out);
        let err = channel.request("initialize", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Closed));
        assert!(err.is_connection_error());

        let (mut channel, _provider_in, mut provider_out) = pair();
        provider_out
            .write_all(b"Traceback (most recent call last):\n")
            .await
            .unwrap();
        let err = channel.request("initialize", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_closed_input_refuses_to_send() {
        let (mut channel, _provider_in, _provider_out) = pair();
        channel.close_input();
        let err = channel
            .notify("notifications/initialized", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Closed));
    }
}
