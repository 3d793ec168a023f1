//! # Link: the module that carries casts and requests between processes.
//!
//! The link is an ordinary module. The bus hands it packages for remote
//! targets; it publishes them on a [`Transport`] and feeds what arrives on
//! its subscriptions back into local delivery.
//!
//! ## Subjects
//! ```text
//! cast.<id>          plain cast to one server
//! stream.cast.<id>   stream cast to one server (default for server_id casts)
//! cast.type.<type>   cast to one server of a pool     (queue group <type>)
//! broadcast.<type>   cast to every server of a pool
//! rpc.<id>           request to one server
//! rpc.type.<type>    request to one server of a pool  (queue group <type>)
//! reply.<id>         replies addressed to this server
//! ```
//!
//! Cast frames carry their expiry as an absolute unix-millisecond deadline,
//! so the receiving process drops casts that go stale in its mailboxes.
//!
//! ## Requests
//! ```text
//! RpcPackage + Responder ─► id = next_id; pending[id] = Responder
//!                          publish RequestFrame { id, reply_to: reply.<own id> }
//!                          after(rpc_timeout) → pending.remove(id) → Timeout
//! reply.<own id> ─► ReplyFrame { id, result } → pending.remove(id) → complete
//! ```
//! Responders live in the module state, so the pending table needs no lock.
//! Outbound publishes go through the worker group keyed by subject, which
//! keeps per-subject order without blocking the link's mailbox.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CodecError, RpcError, RuntimeError};
use crate::module::{Context, ModuleHandle, ServerState};
use crate::runtime::Server;

use super::bus::{CastPackage, RpcPackage};
use super::codec::Frame;
use super::options::Remote;
use super::rpc::{Reply, Responder};
use super::transport::{Delivery, Transport};

/// Name the link module is mounted under.
pub const LINK_MODULE: &str = "link";

#[derive(Serialize, Deserialize)]
struct CastFrame {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Unix milliseconds after which the cast is dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
    message: Frame,
}

#[derive(Serialize, Deserialize)]
struct RequestFrame {
    id: u64,
    #[serde(default)]
    reply_to: Option<String>,
    message: Frame,
}

#[derive(Serialize, Deserialize)]
struct ReplyFrame {
    id: u64,
    result: Result<Value, RpcError>,
}

struct LinkState {
    transport: Arc<dyn Transport>,
    pending: HashMap<u64, Responder>,
    next_id: u64,
}

/// Mounts the link module on `server`, bridging its bus to `transport`.
///
/// Subscriptions are opened in the module's `Before(Run)` hook, so a
/// transport failure aborts [`Server::start`].
pub fn mount(server: &mut Server, transport: Arc<dyn Transport>) -> Result<ModuleHandle, RuntimeError> {
    let bus = server.bus().clone();
    let mut module = server.module(
        LINK_MODULE,
        LinkState {
            transport,
            pending: HashMap::new(),
            next_id: 0,
        },
    );
    bus.register_local_handler(&mut module, on_cast_package)?;
    bus.register_local_rpc(&mut module, on_rpc_package)?;
    bus.register_local_handler(&mut module, on_delivery)?;

    let id = bus.server_id();
    let pool = bus.server_type().to_string();
    let subjects: Vec<(String, Option<String>)> = vec![
        (cast_subject(id), None),
        (stream_cast_subject(id), None),
        (pool_cast_subject(&pool), Some(pool.clone())),
        (broadcast_subject(&pool), None),
        (rpc_subject(id), None),
        (pool_rpc_subject(&pool), Some(pool.clone())),
        (reply_subject(id), None),
    ];
    let handle = module.handle();
    let launcher = server.launcher().clone();
    module.before(ServerState::Run, move |state: &mut LinkState| {
        let transport = state.transport.clone();
        let subjects = subjects.clone();
        let handle = handle.clone();
        let launcher = launcher.clone();
        async move {
            for (subject, group) in subjects {
                let stream = match &group {
                    Some(group) => transport.subscribe_queue(&subject, group).await,
                    None => transport.subscribe(&subject).await,
                }
                .with_context(|| format!("subscribe {subject}"))?;
                launcher.launch(pump(handle.stop_token(), stream, handle.clone()));
                debug!(subject = %subject, "link subscribed");
            }
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    });

    server.mount(module)
}

/// Forwards transport deliveries into the link mailbox until the link stops.
async fn pump(stop: CancellationToken, mut stream: BoxStream<'static, Delivery>, handle: ModuleHandle) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = stream.next() => match next {
                Some(delivery) => {
                    if handle.assign(delivery).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

fn on_cast_package(state: &mut LinkState, pkg: &CastPackage, ctx: &Context<LinkState>) {
    let subject = match &pkg.target {
        Remote::Server { id, stream: true } => stream_cast_subject(*id),
        Remote::Server { id, stream: false } => cast_subject(*id),
        Remote::Pool(pool) => pool_cast_subject(pool),
        Remote::Broadcast(pool) => broadcast_subject(pool),
    };
    let frame = CastFrame {
        headers: pkg.headers.clone(),
        expires_at: pkg.expires.map(wall_deadline),
        message: pkg.frame.clone(),
    };
    match serde_json::to_vec(&frame) {
        Ok(payload) => {
            if let Err(err) = publish(state, ctx, subject, payload) {
                warn!(message = %pkg.frame.kind, error = %err, "remote cast dropped");
            }
        }
        Err(err) => warn!(message = %pkg.frame.kind, error = %err, "remote cast encode failed"),
    }
}

fn on_rpc_package(state: &mut LinkState, pkg: RpcPackage, responder: Responder, ctx: &Context<LinkState>) {
    state.next_id += 1;
    let id = state.next_id;
    let subject = match &pkg.target {
        Remote::Server { id, .. } => rpc_subject(*id),
        Remote::Pool(pool) | Remote::Broadcast(pool) => pool_rpc_subject(pool),
    };
    let frame = RequestFrame {
        id,
        reply_to: Some(reply_subject(ctx.bus().server_id())),
        message: pkg.frame,
    };
    let payload = match serde_json::to_vec(&frame) {
        Ok(payload) => payload,
        Err(err) => {
            responder.fail(CodecError::from(err).into());
            return;
        }
    };
    if let Err(err) = publish(state, ctx, subject, payload) {
        responder.fail(RpcError::Transport {
            message: err.to_string(),
        });
        return;
    }

    state.pending.insert(id, responder);
    let timeout = ctx.bus().rpc_timeout();
    ctx.after(timeout, move |state: &mut LinkState, _: &Context<LinkState>| {
        if let Some(responder) = state.pending.remove(&id) {
            responder.fail(RpcError::Timeout { timeout });
        }
    });
}

fn on_delivery(state: &mut LinkState, delivery: &Delivery, ctx: &Context<LinkState>) {
    let subject = delivery.subject.as_str();
    if subject.starts_with("reply.") {
        on_reply(state, delivery);
    } else if subject.starts_with("rpc.") {
        on_request(state, delivery, ctx);
    } else {
        on_cast(delivery, ctx);
    }
}

fn on_cast(delivery: &Delivery, ctx: &Context<LinkState>) {
    let frame: CastFrame = match serde_json::from_slice(&delivery.payload) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(subject = %delivery.subject, error = %err, "bad cast frame");
            return;
        }
    };
    let expires = frame.expires_at.map(local_deadline);
    match ctx.bus().codec().decode_frame(frame.message) {
        Ok(decoded) => {
            ctx.bus().deliver(
                decoded.tag,
                decoded.name,
                Arc::from(decoded.value),
                None,
                expires,
            );
        }
        Err(err) => warn!(subject = %delivery.subject, error = %err, "inbound cast not decodable"),
    }
}

fn on_request(state: &mut LinkState, delivery: &Delivery, ctx: &Context<LinkState>) {
    let frame: RequestFrame = match serde_json::from_slice(&delivery.payload) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(subject = %delivery.subject, error = %err, "bad request frame");
            return;
        }
    };
    let Some(reply_to) = frame.reply_to.or_else(|| delivery.reply_to.clone()) else {
        warn!(subject = %delivery.subject, "request without reply subject dropped");
        return;
    };

    let id = frame.id;
    let bus = ctx.bus().clone();
    let outcome: BoxFuture<'static, Result<Reply, RpcError>> = match bus.codec().decode_frame(frame.message) {
        Ok(decoded) => bus.request_local(decoded.tag, decoded.name, decoded.value),
        Err(err) => futures::future::ready(Err(RpcError::from(err))).boxed(),
    };
    let transport = state.transport.clone();
    ctx.launcher().launch(async move {
        let result = match outcome.await {
            Ok(reply) => reply.into_json().map_err(RpcError::from),
            Err(err) => Err(err),
        };
        let payload = match serde_json::to_vec(&ReplyFrame { id, result }) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                warn!(id, error = %err, "reply encode failed");
                return;
            }
        };
        if let Err(err) = transport.publish(&reply_to, payload).await {
            warn!(id, subject = %reply_to, error = %err, "reply publish failed");
        }
    });
}

fn on_reply(state: &mut LinkState, delivery: &Delivery) {
    let frame: ReplyFrame = match serde_json::from_slice(&delivery.payload) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(subject = %delivery.subject, error = %err, "bad reply frame");
            return;
        }
    };
    match state.pending.remove(&frame.id) {
        Some(responder) => responder.complete(frame.result.map(Reply::Encoded)),
        None => debug!(id = frame.id, "late or duplicate reply dropped"),
    }
}

/// Publishes on the lane of `subject`, preserving per-subject order.
fn publish(
    state: &LinkState,
    ctx: &Context<LinkState>,
    subject: String,
    payload: Vec<u8>,
) -> Result<(), crate::workers::SubmitError> {
    let transport = state.transport.clone();
    let payload = Bytes::from(payload);
    ctx.workers().submit(subject.clone(), async move {
        if let Err(err) = transport.publish(&subject, payload).await {
            warn!(subject = %subject, error = %err, "publish failed");
        }
    })
}

/// Converts a local deadline into unix milliseconds for the wire.
fn wall_deadline(at: Instant) -> u64 {
    let remaining = at.saturating_duration_since(Instant::now());
    let wall = SystemTime::now() + remaining;
    wall.duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}

/// Converts a wire deadline back into a local one; past deadlines map to now.
fn local_deadline(unix_ms: u64) -> Instant {
    let wall = UNIX_EPOCH + Duration::from_millis(unix_ms);
    let remaining = wall
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Instant::now() + remaining
}

fn cast_subject(id: u32) -> String {
    format!("cast.{id}")
}

fn stream_cast_subject(id: u32) -> String {
    format!("stream.cast.{id}")
}

fn pool_cast_subject(pool: &str) -> String {
    format!("cast.type.{pool}")
}

fn broadcast_subject(pool: &str) -> String {
    format!("broadcast.{pool}")
}

fn rpc_subject(id: u32) -> String {
    format!("rpc.{id}")
}

fn pool_rpc_subject(pool: &str) -> String {
    format!("rpc.type.{pool}")
}

fn reply_subject(id: u32) -> String {
    format!("reply.{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bus::{CastOptions, MemoryTransport};
    use crate::runtime::Config;

    #[derive(Serialize, Deserialize)]
    struct Ping(u32);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pong(u32);

    fn server(server_id: u32) -> Server {
        Server::new(Config {
            server_id,
            rpc_timeout: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(1),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn external_requester_gets_an_encoded_reply() {
        let transport = Arc::new(MemoryTransport::new(64));
        let mut server = server(7);
        let mut module = server.module("echo", ());
        server
            .bus()
            .clone()
            .register_rpc(&mut module, |_, Ping(n): Ping, responder: Responder, _| {
                responder.resolve(Pong(n + 1))
            })
            .unwrap();
        server.mount(module).unwrap();
        mount(&mut server, transport.clone()).unwrap();
        server.start().await.unwrap();

        let request = RequestFrame {
            id: 99,
            reply_to: None,
            message: server.bus().codec().encode_frame(&Ping(41)).unwrap(),
        };
        let answer = transport
            .request(
                &rpc_subject(7),
                Bytes::from(serde_json::to_vec(&request).unwrap()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let reply: ReplyFrame = serde_json::from_slice(&answer).unwrap();
        assert_eq!(reply.id, 99);
        assert_eq!(reply.result.unwrap(), serde_json::json!(42));

        assert!(server.shutdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn request_to_an_absent_server_times_out() {
        let transport = Arc::new(MemoryTransport::new(64));
        let mut server = server(1);
        mount(&mut server, transport).unwrap();
        server.start().await.unwrap();

        let err = server
            .bus()
            .call::<Ping, Pong>(Ping(1), CastOptions::new().server_id(9))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        assert!(server.shutdown().await);
    }

    #[test]
    fn subjects_are_stable() {
        assert_eq!(cast_subject(3), "cast.3");
        assert_eq!(stream_cast_subject(3), "stream.cast.3");
        assert_eq!(pool_cast_subject("game"), "cast.type.game");
        assert_eq!(broadcast_subject("game"), "broadcast.game");
        assert_eq!(rpc_subject(3), "rpc.3");
        assert_eq!(pool_rpc_subject("game"), "rpc.type.game");
        assert_eq!(reply_subject(3), "reply.3");
    }

    #[test]
    fn deadlines_survive_the_wire_and_past_ones_stay_expired() {
        let ahead = wall_deadline(Instant::now() + Duration::from_secs(60));
        let back = local_deadline(ahead);
        assert!(back > Instant::now() + Duration::from_secs(55));

        let stale = local_deadline(0);
        assert!(stale <= Instant::now());
    }

    #[test]
    fn cast_frame_without_deadline_keeps_the_old_shape() {
        let frame = CastFrame {
            headers: BTreeMap::new(),
            expires_at: None,
            message: Frame {
                kind: "t".into(),
                body: Value::Null,
            },
        };
        let raw = serde_json::to_value(&frame).unwrap();
        assert!(raw.get("expires_at").is_none());
        let back: CastFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(back.expires_at, None);
    }
}
