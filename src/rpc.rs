//! Request/response correlation over the push channel.
//!
//! The venue intermixes a lightweight acknowledgement with the final
//! business response under the same request ID, with no envelope
//! discriminant to tell them apart. Calls therefore go through
//! [`Connection::send_multi`] with the [`is_ack_frame`] classifier, and only
//! the last frame of an exchange is decoded as the result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{sign_login, Credentials};
use crate::connection::Connection;
use crate::error::{WsError, WsResult};
use crate::types::{ApiPayload, ResponseEnvelope, WsRequest, STATUS_OK};

/// Identity returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginIdentity {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub api_key: String,
}

/// Venue-specific workaround: ack frames carry no discriminant field and
/// share the response envelope with terminal results; the only reliable
/// marker is `"ack": true` inside `data`. Keep all content inspection behind
/// this one predicate.
pub fn is_ack_frame(raw: &str) -> bool {
    #[derive(Deserialize, Default)]
    struct AckData {
        #[serde(default)]
        ack: bool,
    }
    #[derive(Deserialize)]
    struct AckPeek {
        #[serde(default)]
        data: AckData,
    }

    serde_json::from_str::<AckPeek>(raw)
        .map(|peek| peek.data.ack)
        .unwrap_or(false)
}

/// Issue an API call on `channel` and decode the terminal frame's `result`
/// into `T`.
///
/// `expected_responses` is the number of frames the venue sends for this
/// route (2 for order routes: ack + result). The wait ends early when a
/// terminal frame arrives; it fails with a timeout when the terminal frame
/// never does. The last frame received is authoritative; prior frames are
/// acknowledgements only.
pub async fn send_request<T, P>(
    conn: &Connection,
    channel: &str,
    event: &str,
    params: &P,
    expected_responses: usize,
) -> WsResult<T>
where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
{
    if channel.trim().is_empty() {
        return Err(WsError::Precondition("channel must not be empty".to_string()));
    }
    if expected_responses == 0 {
        return Err(WsError::Precondition(
            "expected_responses must be at least 1".to_string(),
        ));
    }

    let req_param = serde_json::to_value(params)?;
    let req_id = conn.generate_message_id();
    let request = WsRequest::api_event(channel, event, ApiPayload::params(req_id.clone(), req_param));
    let payload = serde_json::to_string(&request)?;

    let frames = conn
        .send_multi(&req_id, payload, expected_responses, is_ack_frame)
        .await
        .map_err(|e| e.on_channel(channel))?;

    let terminal = frames.last().ok_or_else(|| WsError::EmptyResponse {
        channel: channel.to_string(),
    })?;
    decode_terminal(terminal).map_err(|e| e.on_channel(channel))
}

/// Authenticate this connection for private channels.
///
/// A single-phase call: exactly one response frame is expected. The
/// credentials proof is an HMAC-SHA512 signature over the login channel and
/// a unix-second timestamp.
pub async fn login(
    conn: &Connection,
    credentials: &Credentials,
    channel: &str,
) -> WsResult<LoginIdentity> {
    if channel.trim().is_empty() {
        return Err(WsError::Precondition("channel must not be empty".to_string()));
    }

    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign_login(&credentials.api_secret, channel, timestamp)?;

    let req_id = conn.generate_message_id();
    let payload = ApiPayload {
        req_id: req_id.clone(),
        api_key: Some(credentials.api_key.clone()),
        signature: Some(signature),
        timestamp: Some(timestamp.to_string()),
        req_param: None,
    };
    let request = WsRequest::api(channel, payload);
    let json = serde_json::to_string(&request)?;

    let frame = conn
        .send_one(&req_id, json)
        .await
        .map_err(|e| e.on_channel(channel))?;
    decode_terminal(&frame).map_err(|e| e.on_channel(channel))
}

/// Check a subscribe/unsubscribe confirmation frame for a venue rejection.
pub(crate) fn check_confirm(frame: &str) -> WsResult<()> {
    let envelope: ResponseEnvelope = serde_json::from_str(frame)?;
    status_check(&envelope)
}

/// Decode the terminal frame of a call: validate the header status, then
/// unmarshal the inner `result` into the caller's type.
fn decode_terminal<T: DeserializeOwned>(frame: &str) -> WsResult<T> {
    let envelope: ResponseEnvelope = serde_json::from_str(frame)?;
    status_check(&envelope)?;

    match envelope.data.and_then(|data| data.result) {
        Some(raw) => Ok(serde_json::from_str(raw.get())?),
        // Some routes return no body; let unit/option targets decode from null
        None => Ok(serde_json::from_str("null")?),
    }
}

fn status_check(envelope: &ResponseEnvelope) -> WsResult<()> {
    let header = envelope
        .header
        .as_ref()
        .ok_or_else(|| WsError::Protocol("response envelope missing header".to_string()))?;

    if header.status == STATUS_OK {
        return Ok(());
    }

    match envelope.data.as_ref().and_then(|data| data.errs.as_ref()) {
        Some(errs) => Err(WsError::VenueRejection {
            label: errs.label.clone(),
            message: errs.message.clone(),
        }),
        None => Err(WsError::VenueRejection {
            label: header.status.clone(),
            message: "venue returned non-success status without error body".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionCommand;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct OrderEcho {
        id: String,
    }

    fn frame(req_id: &str, status: &str, data: &str) -> String {
        format!(
            r#"{{"request_id":"{req_id}","header":{{"status":"{status}","channel":"spot.order_place","event":"api","trace_id":"t-1"}},"data":{data}}}"#
        )
    }

    fn harness(
        timeout_ms: u64,
        replies: fn(&str) -> Vec<String>,
    ) -> Connection {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let conn = Connection::new(cmd_tx, Duration::from_millis(timeout_ms));
        let pending = conn.pending();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let ConnectionCommand::Send(text) = cmd {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let req_id = value["payload"]["req_id"].as_str().unwrap().to_string();
                    for reply in replies(&req_id) {
                        pending.dispatch(&req_id, &reply);
                    }
                }
            }
        });
        conn
    }

    #[test]
    fn test_ack_classifier() {
        assert!(is_ack_frame(&frame("1", "200", r#"{"ack":true}"#)));
        assert!(!is_ack_frame(&frame("1", "200", r#"{"result":{"id":"7"}}"#)));
        assert!(!is_ack_frame(&frame("1", "200", r#"{"ack":false}"#)));
        assert!(!is_ack_frame("not json"));
    }

    #[tokio::test]
    async fn test_send_request_decodes_terminal_frame() {
        let conn = harness(1000, |id| {
            vec![
                frame(id, "200", r#"{"ack":true}"#),
                frame(id, "200", r#"{"result":{"id":"7"}}"#),
            ]
        });

        let echo: OrderEcho = send_request(
            &conn,
            "spot.order_place",
            "api",
            &serde_json::json!({"currency_pair": "BTC_USDT"}),
            2,
        )
        .await
        .unwrap();
        assert_eq!(echo, OrderEcho { id: "7".to_string() });
    }

    #[tokio::test]
    async fn test_send_request_ack_only_times_out() {
        let conn = harness(100, |id| vec![frame(id, "200", r#"{"ack":true}"#)]);

        let err = send_request::<OrderEcho, _>(
            &conn,
            "spot.order_place",
            "api",
            &serde_json::json!({}),
            2,
        )
        .await
        .unwrap_err();
        match err {
            WsError::Call { channel, source } => {
                assert_eq!(channel, "spot.order_place");
                assert!(matches!(*source, WsError::Timeout));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_request_surfaces_venue_rejection() {
        let conn = harness(1000, |id| {
            vec![frame(
                id,
                "400",
                r#"{"errs":{"label":"INVALID_PARAM","message":"amount too small"}}"#,
            )]
        });

        let err = send_request::<OrderEcho, _>(
            &conn,
            "spot.order_place",
            "api",
            &serde_json::json!({}),
            2,
        )
        .await
        .unwrap_err();
        match err {
            WsError::Call { source, .. } => match *source {
                WsError::VenueRejection { label, message } => {
                    assert_eq!(label, "INVALID_PARAM");
                    assert_eq!(message, "amount too small");
                }
                other => panic!("expected venue rejection, got {other:?}"),
            },
            other => panic!("expected call error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_channel_is_a_precondition_error() {
        // No I/O may be attempted: the harness channel is closed, so any
        // send would surface as ChannelClosed instead.
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        drop(cmd_rx);
        let conn = Connection::new(cmd_tx, Duration::from_millis(100));

        let err = send_request::<OrderEcho, _>(&conn, "  ", "api", &serde_json::json!({}), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let conn = harness(1000, |id| {
            vec![frame(
                id,
                "200",
                r#"{"result":{"uid":"100234","api_key":"k-1"}}"#,
            )]
        });

        let credentials = Credentials::new("k-1", "secret");
        let identity = login(&conn, &credentials, "spot.login").await.unwrap();
        assert_eq!(identity.uid, "100234");
        assert_eq!(identity.api_key, "k-1");
    }

    #[tokio::test]
    async fn test_login_rejection() {
        let conn = harness(1000, |id| {
            vec![frame(
                id,
                "401",
                r#"{"errs":{"label":"INVALID_KEY","message":"signature mismatch"}}"#,
            )]
        });

        let credentials = Credentials::new("k-1", "wrong");
        let err = login(&conn, &credentials, "spot.login").await.unwrap_err();
        match err {
            WsError::Call { channel, source } => {
                assert_eq!(channel, "spot.login");
                assert!(matches!(*source, WsError::VenueRejection { .. }));
            }
            other => panic!("expected call error, got {other:?}"),
        }
    }

    #[test]
    fn test_check_confirm() {
        assert!(check_confirm(&frame("1", "200", r#"{"result":{"status":"success"}}"#)).is_ok());
        assert!(check_confirm(&frame(
            "1",
            "429",
            r#"{"errs":{"label":"TOO_MANY","message":"slow down"}}"#
        ))
        .is_err());
    }
}
