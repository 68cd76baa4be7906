//! JSON-RPC protocol handling for LSP
//!
//! Implements the JSON-RPC 2.0 message format used by LSP,
//! including Content-Length framing for the stdio transport.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

pub const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        frame(self)
    }
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        frame(self)
    }
}

/// JSON-RPC response (incoming from server)
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<i64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Get the result, or error if present
    pub fn into_result(self) -> Result<serde_json::Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(serde_json::Value::Null))
        }
    }
}

/// JSON-RPC response (outgoing to server, answering server requests)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub result: serde_json::Value,
}

impl JsonRpcResponseOut {
    /// Create a success response with null result
    pub fn success_null(id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: serde_json::Value::Null,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        frame(self)
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize, thiserror::Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Server-to-client request (has both id and method)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRequest {
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// Incoming notification from server (no id)
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A decoded message from the server
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Request(ServerRequest),
    Response(JsonRpcResponse),
    Notification(IncomingNotification),
}

impl ServerMessage {
    /// Classify a raw message body. Requests carry both `id` and `method`,
    /// responses only `id`, notifications only `method`.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        let has_method = value.get("method").is_some();

        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).map(ServerMessage::Request),
            (true, false) => serde_json::from_value(value).map(ServerMessage::Response),
            _ => serde_json::from_value(value).map(ServerMessage::Notification),
        }
    }
}

/// Atomic ID generator for JSON-RPC requests
pub struct IdGenerator(AtomicI64);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn frame<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_string(message)?;
    Ok(format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes())
}

/// Parse Content-Length header from LSP message headers
///
/// LSP uses HTTP-like headers before the JSON body:
/// ```text
/// Content-Length: 123\r\n
/// \r\n
/// {"jsonrpc": "2.0", ...}
/// ```
pub fn parse_content_length(headers: &str) -> Option<usize> {
    for line in headers.lines() {
        let line = line.trim();
        if line.to_lowercase().starts_with("content-length:") {
            return line
                .split(':')
                .nth(1)
                .and_then(|len| len.trim().parse().ok());
        }
    }
    None
}

/// Largest body `read_message` will allocate for
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Read one framed message body. `Ok(None)` on clean EOF.
///
/// Header blocks without a Content-Length are skipped.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut headers = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                break;
            }
            headers.push_str(&line);
        }

        match parse_content_length(&headers) {
            Some(len) if len > MAX_MESSAGE_SIZE => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("LSP message of {} bytes exceeds the {} byte limit", len, MAX_MESSAGE_SIZE),
                ));
            }
            Some(len) => {
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body).await?;
                return Ok(Some(body));
            }
            None => {
                if !headers.is_empty() {
                    tracing::warn!("LSP message missing Content-Length header");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_content_length() {
        let headers = "Content-Length: 123\r\nContent-Type: application/json\r\n";
        assert_eq!(parse_content_length(headers), Some(123));

        let headers = "content-length: 456\r\n";
        assert_eq!(parse_content_length(headers), Some(456));

        let headers = "X-Custom: value\r\n";
        assert_eq!(parse_content_length(headers), None);
    }

    #[test]
    fn test_notification_encode() {
        let notif = JsonRpcNotification::new(
            DID_CHANGE_CONFIGURATION,
            Some(serde_json::json!({"settings": {}})),
        );
        let encoded = String::from_utf8(notif.encode().unwrap()).unwrap();

        assert!(encoded.starts_with("Content-Length:"));
        assert!(encoded.contains("\r\n\r\n"));
        assert!(encoded.contains("\"method\":\"workspace/didChangeConfiguration\""));
        // Notifications should not have an id
        assert!(!encoded.contains("\"id\":"));
    }

    #[test]
    fn test_request_encode_length_matches_body() {
        let req = JsonRpcRequest::new(7, "shutdown", None);
        let encoded = String::from_utf8(req.encode().unwrap()).unwrap();
        let (headers, body) = encoded.split_once("\r\n\r\n").unwrap();

        assert_eq!(parse_content_length(headers), Some(body.len()));
        assert!(body.contains("\"id\":7"));
        assert!(!body.contains("params"));
    }

    #[test]
    fn test_id_generator() {
        let gen = IdGenerator::new();
        assert_eq!(gen.next(), 1);
        assert_eq!(gen.next(), 2);
        assert_eq!(gen.next(), 3);
    }

    #[test]
    fn test_response_into_result() {
        let error: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#,
        )
        .unwrap();
        let err = error.into_result().unwrap_err();
        assert_eq!(err.to_string(), "JSON-RPC error -32600: Invalid Request");
    }

    #[test]
    fn test_server_message_classification() {
        let request = br#"{"jsonrpc":"2.0","id":"a","method":"workspace/configuration","params":{}}"#;
        assert!(matches!(ServerMessage::parse(request).unwrap(), ServerMessage::Request(_)));

        let response = br#"{"jsonrpc":"2.0","id":3,"result":null}"#;
        assert!(matches!(ServerMessage::parse(response).unwrap(), ServerMessage::Response(_)));

        let notification = br#"{"jsonrpc":"2.0","method":"window/logMessage","params":{"message":"hi"}}"#;
        assert!(matches!(
            ServerMessage::parse(notification).unwrap(),
            ServerMessage::Notification(_)
        ));

        assert!(ServerMessage::parse(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_read_message_sequence() {
        let mut stream = Vec::new();
        stream.extend(JsonRpcNotification::new("a", None).encode().unwrap());
        stream.extend(b"X-Junk: 1\r\n\r\n");
        stream.extend(JsonRpcNotification::new("b", None).encode().unwrap());

        let mut reader = BufReader::new(stream.as_slice());
        let first = read_message(&mut reader).await.unwrap().unwrap();
        assert!(String::from_utf8(first).unwrap().contains("\"method\":\"a\""));
        let second = read_message(&mut reader).await.unwrap().unwrap();
        assert!(String::from_utf8(second).unwrap().contains("\"method\":\"b\""));
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_message_rejects_oversized_body() {
        let stream = format!("Content-Length: {}\r\n\r\n{{}}", MAX_MESSAGE_SIZE + 1);
        let mut reader = BufReader::new(stream.as_bytes());

        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
