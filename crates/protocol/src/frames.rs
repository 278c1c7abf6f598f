//! JSON wire frames exchanged with the gateway.

use serde::{Deserialize, Serialize};

/// Error shape carried in failed RPC responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Client → gateway RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Discriminated union of all inbound frame types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrameInner),
    #[serde(rename = "res")]
    Response(ResponseFrameInner),
    #[serde(rename = "event")]
    Event(EventFrameInner),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrameInner {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrameInner {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Server-push event. `seq` increases by one per delivered event on a
/// healthy connection; a skip means frames were lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrameInner {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_shape() {
        let frame = RequestFrame::new("r1", "cron.list", Some(serde_json::json!({})));
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "req");
        assert_eq!(v["method"], "cron.list");
    }

    #[test]
    fn test_decode_event_frame() {
        let json = r#"{"type":"event","event":"cron","payload":{"jobId":"j1","action":"finished"},"seq":7}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Event(ev) => {
                assert_eq!(ev.event, "cron");
                assert_eq!(ev.seq, Some(7));
            },
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let json = r#"{"type":"res","id":"r1","ok":false,"error":{"code":"INVALID_REQUEST","message":"unknown id"}}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Response(res) => {
                assert!(!res.ok);
                assert_eq!(res.error.unwrap().code, "INVALID_REQUEST");
            },
            other => panic!("expected response frame, got {other:?}"),
        }
    }
}
