// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The WebSocket event transport.
//!
//! One actor per client connection. Inbound frames are JSON objects
//! `{"event": <name>, "data": <payload>, "seq": <number>}`; every handled
//! event is acknowledged with `{"seq", "success", "result"}`. Handler
//! futures are awaited with the actor mailbox blocked, so events of one
//! connection are processed strictly in receive order. Outbound
//! notifications arrive over the channel registered with the backend
//! router and are forwarded as `{"event", "payload"}` frames.

use actix::{
    Actor, ActorContext, ActorFutureExt, AsyncContext, ContextFutureSpawner, Running,
    StreamHandler, WrapFuture, clock::Instant, fut,
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::mpsc, time::Duration};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};
use veilbackend::{
    ChatService,
    api::{self, Envelope},
    router::OutboundEvent,
};
use veilcommon::identifiers::ConnectionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A client request frame.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    seq: Option<u64>,
}

/// Acknowledgement for a request frame.
#[derive(Debug, Serialize)]
struct AckFrame {
    seq: u64,
    #[serde(flatten)]
    envelope: Envelope,
}

/// The websocket actor handling one connection's lifecycle.
struct ChatWsConnection {
    connection: ConnectionId,
    service: ChatService,
    heartbeat: Instant,
}

impl ChatWsConnection {
    fn new(connection: ConnectionId, service: ChatService) -> Self {
        Self {
            connection,
            service,
            heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > CLIENT_TIMEOUT {
                debug!(connection = %act.connection, "heartbeat failed, closing websocket");
                ctx.stop();
                return;
            }
            ctx.ping(b"veil");
        });
    }

    /// Run one event through the dispatcher. `wait` blocks the mailbox,
    /// which is what serializes a connection's events.
    fn handle_frame(&self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        let service = self.service.clone();
        let connection = self.connection;
        async move {
            let envelope = api::dispatch(&service, connection, &frame.event, frame.data).await;
            (frame.event, frame.seq, envelope)
        }
        .into_actor(self)
        .then(|(event, seq, envelope), _act, ctx| {
            match (seq, envelope) {
                (Some(seq), Some(envelope)) => match serde_json::to_string(&AckFrame {
                    seq,
                    envelope,
                }) {
                    Ok(ack) => ctx.text(ack),
                    Err(serde_error) => {
                        error!(%event, %serde_error, "failed to serialize acknowledgement");
                    }
                },
                (None, Some(_)) => {}
                (_, None) => warn!(%event, "event without a handler"),
            }
            fut::ready(())
        })
        .wait(ctx);
    }
}

impl Actor for ChatWsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        // Register with the backend: session record plus the outbound
        // notification channel this actor forwards to the socket.
        let (tx, rx) = mpsc::unbounded_channel();
        self.service.connect(self.connection, tx);
        ctx.add_stream(UnboundedReceiverStream::new(rx));
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        let service = self.service.clone();
        let connection = self.connection;
        actix::spawn(async move {
            service.disconnect(connection).await;
        });
        Running::Stop
    }
}

/// Inbound websocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatWsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let Ok(ws_msg) = msg else {
            ctx.stop();
            return;
        };
        match ws_msg {
            ws::Message::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => self.handle_frame(frame, ctx),
                Err(parse_error) => {
                    debug!(connection = %self.connection, %parse_error, "unparseable frame");
                }
            },
            ws::Message::Ping(bytes) => {
                self.heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.heartbeat = Instant::now();
            }
            ws::Message::Close(close_reason) => {
                debug!(connection = %self.connection, ?close_reason, "client closed");
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                ctx.stop();
            }
            _ => {
                warn!(connection = %self.connection, "unexpected websocket message");
            }
        }
    }
}

/// Outbound notifications from the router.
impl StreamHandler<OutboundEvent> for ChatWsConnection {
    fn handle(&mut self, event: OutboundEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(frame) => ctx.text(frame),
            Err(serde_error) => {
                error!(event = event.event, %serde_error, "failed to serialize notification");
            }
        }
    }
}

/// Upgrade a HTTP connection to the event socket.
pub(crate) async fn upgrade_connection(
    req: HttpRequest,
    stream: web::Payload,
    service: web::Data<ChatService>,
) -> impl Responder {
    let connection = ConnectionId::random();
    debug!(%connection, "upgrading connection to websocket");
    let ws_connection = ChatWsConnection::new(connection, service.get_ref().clone());
    match ws::start(ws_connection, &req, stream) {
        Ok(response) => response,
        Err(upgrade_error) => {
            error!(%upgrade_error, "websocket upgrade failed");
            HttpResponse::InternalServerError().body(upgrade_error.to_string())
        }
    }
}
