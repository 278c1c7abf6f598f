//! WebSocket gateway client: framing, request correlation, push fan-out.
//!
//! One connection per client. Requests are correlated by generated id; push
//! events fan out to any number of subscribers through a broadcast channel.
//! The client does not reconnect: when the socket drops, every pending
//! request fails with [`Error::Closed`] and the owner decides what next.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, stream::SplitStream},
    serde::{Serialize, de::DeserializeOwned},
    tokio::{
        net::TcpStream,
        sync::{broadcast, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
    },
    tracing::{debug, trace, warn},
    uuid::Uuid,
};

use cronview_protocol::{
    CronJob, CronJobCreate, CronJobPatch, ErrorShape, GatewayFrame, PushMessage, RequestFrame,
    RunLogEntry, RunMode, SchedulerStatus,
    rpc::{ListParams, ListResponse, RemoveParams, RunParams, RunsParams, RunsResponse,
        UpdateParams, methods},
};

use crate::{
    error::{Error, Result},
    gateway::{CronGateway, PushStream},
};

/// Capacity of the push fan-out channel. A subscriber that lags behind this
/// many messages receives a gap marker instead of the dropped events.
const PUSH_CHANNEL_CAPACITY: usize = 256;

type Pending = Mutex<HashMap<String, oneshot::Sender<Result<Option<serde_json::Value>>>>>;

/// A connected gateway client. Cheap to share; all methods take `&self`.
pub struct GatewayClient {
    writer: mpsc::UnboundedSender<Message>,
    pending: Arc<Pending>,
    push: broadcast::Sender<PushMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayClient {
    /// Open a WebSocket connection to the gateway and start the read and
    /// write loops.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| Error::transport(e.to_string()))?;
        debug!(url, "gateway connected");
        let (mut sink, stream) = socket.split();

        let (writer, mut outbound) = mpsc::unbounded_channel::<Message>();
        let (push, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));

        let write_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "gateway write failed");
                    break;
                }
            }
            debug!("gateway write loop exited");
        });
        let read_task = tokio::spawn(read_loop(stream, Arc::clone(&pending), push.clone()));

        Ok(Arc::new(Self {
            writer,
            pending,
            push,
            tasks: Mutex::new(vec![write_task, read_task]),
        }))
    }

    /// Tear the connection down. Pending requests fail with [`Error::Closed`];
    /// push subscribers see end-of-stream.
    pub fn close(&self) {
        let _ = self.writer.send(Message::Close(None));
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        fail_pending(&self.pending);
        debug!("gateway client closed");
    }

    /// Send one RPC request and wait for its correlated response payload.
    async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let id = Uuid::new_v4().to_string();
        let frame = RequestFrame::new(id.clone(), method, params);
        let text = serde_json::to_string(&frame).map_err(|e| Error::transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);
        // Reclaims the slot if this future is dropped before the response
        // arrives, e.g. when the caller's deadline fires first. Otherwise a
        // server that stays connected but never answers would grow the
        // pending map without bound.
        let _slot = PendingSlot {
            pending: &*self.pending,
            id: &id,
        };
        trace!(method, %id, "sending request");
        if self.writer.send(Message::text(text)).is_err() {
            return Err(Error::Closed);
        }

        match rx.await {
            Ok(result) => result,
            // The read loop dropped the sender without responding.
            Err(_) => Err(Error::Closed),
        }
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Result<Option<serde_json::Value>>>>>
    {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CronGateway for GatewayClient {
    async fn status(&self) -> Result<SchedulerStatus> {
        let payload = self.request(methods::STATUS, None).await?;
        decode(methods::STATUS, payload)
    }

    async fn list(&self, include_disabled: bool) -> Result<Vec<CronJob>> {
        let params = encode(&ListParams { include_disabled })?;
        let payload = self.request(methods::LIST, params).await?;
        let response: ListResponse = decode(methods::LIST, payload)?;
        Ok(response.jobs)
    }

    async fn runs(&self, id: &str, limit: usize) -> Result<Vec<RunLogEntry>> {
        let params = encode(&RunsParams {
            id: id.to_string(),
            limit,
        })?;
        let payload = self.request(methods::RUNS, params).await?;
        let response: RunsResponse = decode(methods::RUNS, payload)?;
        Ok(response.entries)
    }

    async fn run(&self, id: &str, mode: RunMode) -> Result<()> {
        let params = encode(&RunParams {
            id: id.to_string(),
            mode,
        })?;
        self.request(methods::RUN, params).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let params = encode(&RemoveParams { id: id.to_string() })?;
        self.request(methods::REMOVE, params).await?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: CronJobPatch) -> Result<()> {
        let params = encode(&UpdateParams {
            id: id.to_string(),
            patch,
        })?;
        self.request(methods::UPDATE, params).await?;
        Ok(())
    }

    async fn add(&self, create: CronJobCreate) -> Result<()> {
        let params = encode(&create)?;
        self.request(methods::ADD, params).await?;
        Ok(())
    }

    fn subscribe(&self) -> PushStream {
        let stream = BroadcastStream::new(self.push.subscribe()).map(|item| match item {
            Ok(message) => message,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "push subscriber lagged");
                PushMessage::Gap
            },
        });
        Box::pin(stream)
    }
}

/// Removes a request's pending-map entry when dropped. A response that has
/// already resolved the entry makes this a no-op.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.id);
    }
}

fn encode<T: Serialize>(params: &T) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(params)
        .map(Some)
        .map_err(|e| Error::transport(e.to_string()))
}

fn decode<T: DeserializeOwned>(
    method: &'static str,
    payload: Option<serde_json::Value>,
) -> Result<T> {
    let payload = payload.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(payload).map_err(|e| Error::decode(method, e))
}

async fn read_loop(
    mut stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pending: Arc<Pending>,
    push: broadcast::Sender<PushMessage>,
) {
    let mut last_seq: Option<u64> = None;
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                continue;
            },
            Err(e) => {
                warn!(error = %e, "gateway read failed");
                break;
            },
        };
        match serde_json::from_str::<GatewayFrame>(text.as_str()) {
            Ok(frame) => dispatch(frame, &pending, &push, &mut last_seq),
            Err(e) => debug!(error = %e, "dropping undecodable gateway frame"),
        }
    }
    // Connection is gone: fail anything still waiting on a response.
    fail_pending(&pending);
    debug!("gateway read loop exited");
}

fn dispatch(
    frame: GatewayFrame,
    pending: &Pending,
    push: &broadcast::Sender<PushMessage>,
    last_seq: &mut Option<u64>,
) {
    match frame {
        GatewayFrame::Response(res) => {
            let sender = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&res.id);
            let Some(sender) = sender else {
                debug!(id = %res.id, "response for unknown request id");
                return;
            };
            let result = if res.ok {
                Ok(res.payload)
            } else {
                let shape = res
                    .error
                    .unwrap_or_else(|| ErrorShape::new("UNKNOWN", "request failed"));
                Err(Error::rejected(shape.code, shape.message))
            };
            let _ = sender.send(result);
        },
        GatewayFrame::Event(ev) => {
            if seq_gap(last_seq, ev.seq) {
                debug!(seq = ?ev.seq, "push sequence gap");
                let _ = push.send(PushMessage::Gap);
            }
            let _ = push.send(PushMessage::Event {
                event: ev.event,
                payload: ev.payload,
            });
        },
        GatewayFrame::Request(req) => {
            trace!(method = %req.method, "ignoring server-initiated request");
        },
    }
}

/// Track the event sequence. Returns true when `seq` breaks the run of
/// consecutive numbers. Unsequenced events carry no ordering claim and
/// leave the counter untouched.
fn seq_gap(last: &mut Option<u64>, seq: Option<u64>) -> bool {
    let Some(seq) = seq else { return false };
    let gap = matches!(*last, Some(prev) if seq != prev.wrapping_add(1));
    *last = Some(seq);
    gap
}

fn fail_pending(pending: &Pending) {
    let waiting: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (id, sender) in waiting {
        trace!(%id, "failing pending request: connection closed");
        let _ = sender.send(Err(Error::Closed));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    // ── seq_gap ─────────────────────────────────────────────────────────

    #[test]
    fn test_first_sequenced_event_is_not_a_gap() {
        let mut last = None;
        assert!(!seq_gap(&mut last, Some(17)));
        assert_eq!(last, Some(17));
    }

    #[test]
    fn test_consecutive_sequence_is_not_a_gap() {
        let mut last = Some(4);
        assert!(!seq_gap(&mut last, Some(5)));
        assert!(!seq_gap(&mut last, Some(6)));
    }

    #[test]
    fn test_skipped_sequence_is_a_gap() {
        let mut last = Some(4);
        assert!(seq_gap(&mut last, Some(7)));
        // The counter resynchronizes on the observed value.
        assert!(!seq_gap(&mut last, Some(8)));
    }

    #[test]
    fn test_one_two_four_yields_exactly_one_gap() {
        let mut last = None;
        let gaps = [1, 2, 4]
            .into_iter()
            .filter(|&s| seq_gap(&mut last, Some(s)))
            .count();
        assert_eq!(gaps, 1);
    }

    #[test]
    fn test_regressed_sequence_is_a_gap() {
        let mut last = Some(9);
        assert!(seq_gap(&mut last, Some(3)));
    }

    #[test]
    fn test_unsequenced_event_leaves_counter_untouched() {
        let mut last = Some(4);
        assert!(!seq_gap(&mut last, None));
        assert_eq!(last, Some(4));
        assert!(!seq_gap(&mut last, Some(5)));
    }

    // ── dispatch ────────────────────────────────────────────────────────

    fn pending_with(id: &str) -> (Pending, oneshot::Receiver<Result<Option<serde_json::Value>>>) {
        let (tx, rx) = oneshot::channel();
        let mut map = HashMap::new();
        map.insert(id.to_string(), tx);
        (Mutex::new(map), rx)
    }

    fn decode_frame(json: serde_json::Value) -> GatewayFrame {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn test_ok_response_resolves_pending_request() {
        let (pending, rx) = pending_with("r1");
        let (push, _) = broadcast::channel(8);
        let frame = decode_frame(serde_json::json!({
            "type": "res", "id": "r1", "ok": true, "payload": { "jobs": [] },
        }));

        dispatch(frame, &pending, &push, &mut None);

        let payload = rx.await.unwrap().unwrap().unwrap();
        assert_eq!(payload, serde_json::json!({ "jobs": [] }));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_response_maps_to_rejection() {
        let (pending, rx) = pending_with("r1");
        let (push, _) = broadcast::channel(8);
        let frame = decode_frame(serde_json::json!({
            "type": "res", "id": "r1", "ok": false,
            "error": { "code": "NOT_FOUND", "message": "no such job" },
        }));

        dispatch(frame, &pending, &push, &mut None);

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "NOT_FOUND: no such job");
    }

    #[tokio::test]
    async fn test_response_for_unknown_id_is_ignored() {
        let (pending, _rx) = pending_with("r1");
        let (push, _) = broadcast::channel(8);
        let frame = decode_frame(serde_json::json!({
            "type": "res", "id": "other", "ok": true,
        }));

        dispatch(frame, &pending, &push, &mut None);
        assert_eq!(pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequence_skip_emits_gap_before_event() {
        let pending = Mutex::new(HashMap::new());
        let (push, mut rx) = broadcast::channel(8);
        let mut last = Some(4);
        let frame = decode_frame(serde_json::json!({
            "type": "event", "event": "cron",
            "payload": { "jobId": "j1", "action": "finished" }, "seq": 9,
        }));

        dispatch(frame, &pending, &push, &mut last);

        assert_eq!(rx.recv().await.unwrap(), PushMessage::Gap);
        assert!(matches!(
            rx.recv().await.unwrap(),
            PushMessage::Event { event, .. } if event == "cron"
        ));
    }

    // ── connection round trip ───────────────────────────────────────────

    #[tokio::test]
    async fn test_request_response_round_trip_with_push() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let message = socket.next().await.unwrap().unwrap();
            let frame: GatewayFrame =
                serde_json::from_str(message.to_text().unwrap()).unwrap();
            let GatewayFrame::Request(req) = frame else {
                panic!("expected a request frame");
            };
            assert_eq!(req.method, methods::LIST);
            assert_eq!(req.params, Some(serde_json::json!({ "includeDisabled": true })));

            let response = serde_json::json!({
                "type": "res", "id": req.id, "ok": true, "payload": { "jobs": [] },
            });
            socket.send(Message::text(response.to_string())).await.unwrap();

            let event = serde_json::json!({
                "type": "event", "event": "cron",
                "payload": { "jobId": "j1", "action": "finished" }, "seq": 1,
            });
            socket.send(Message::text(event.to_string())).await.unwrap();
        });

        let client = GatewayClient::connect(&format!("ws://{addr}")).await.unwrap();
        let mut push = client.subscribe();

        let jobs = client.list(true).await.unwrap();
        assert!(jobs.is_empty());

        let message = push.next().await.unwrap();
        assert!(matches!(message, PushMessage::Event { ref event, .. } if event == "cron"));

        server.await.unwrap();
        client.close();
    }

    #[tokio::test]
    async fn test_dropped_request_reclaims_pending_slot() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // A server that accepts the request but never answers, holding the
        // connection open.
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = socket.next().await {}
        });

        let client = GatewayClient::connect(&format!("ws://{addr}")).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), client.status()).await;
        assert!(result.is_err(), "expected the caller-side deadline to fire");
        assert!(client.lock_pending().is_empty());

        client.close();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_requests() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Read the request, then drop the connection without answering.
            let _ = socket.next().await;
        });

        let client = GatewayClient::connect(&format!("ws://{addr}")).await.unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, Error::Closed));
        server.await.unwrap();
    }
}
