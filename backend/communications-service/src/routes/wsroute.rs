use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_middleware::bearer_token;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::AppError;
use crate::metrics::WS_CONNECTIONS;
use crate::middleware::guards::ConversationMember;
use crate::services::{DeliveryOutcome, DeliveryService, SendRequest, UploadedFile};
use crate::state::AppState;
use crate::websocket::message_types::{InlineFile, WsInboundEvent, WsOutboundEvent};
use crate::websocket::{group_name, ConnectionRegistry, SubscriberId};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// Payload fanned out to this connection's group
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct BroadcastMessage(String);

// Reply addressed to this connection only
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

struct WsSession {
    conversation_id: i64,
    user_id: i64,
    subscriber_id: SubscriberId,
    registry: ConnectionRegistry,
    delivery: DeliveryService,
    inbox: Option<UnboundedReceiver<String>>,
    hb: Instant,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    user_id = act.user_id,
                    conversation_id = act.conversation_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_send(&self, text: String, files: Vec<InlineFile>, ctx: &mut ws::WebsocketContext<Self>) {
        let addr = ctx.address();
        let files = match decode_files(files) {
            Ok(files) => files,
            Err(reason) => {
                addr.do_send(TextMessage(WsOutboundEvent::Error { reason }.to_json()));
                return;
            }
        };

        let delivery = self.delivery.clone();
        let request = SendRequest {
            conversation_id: self.conversation_id,
            sender_id: self.user_id,
            text,
            files,
        };

        // Runs to completion even if this socket goes away
        actix::spawn(async move {
            match delivery.send(request).await {
                Ok(DeliveryOutcome::Delivered(_)) | Ok(DeliveryOutcome::Dropped) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket send rejected");
                    let reason = if e.status_code() >= 500 {
                        "Message could not be delivered".to_string()
                    } else {
                        e.to_string()
                    };
                    addr.do_send(TextMessage(WsOutboundEvent::Error { reason }.to_json()));
                }
            }
        });
    }
}

fn decode_files(files: Vec<InlineFile>) -> Result<Vec<UploadedFile>, String> {
    files
        .into_iter()
        .map(|file| {
            STANDARD
                .decode(file.data.as_bytes())
                .map(|bytes| UploadedFile {
                    name: file.name.clone(),
                    bytes,
                })
                .map_err(|_| format!("file {} is not valid base64", file.name))
        })
        .collect()
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = self.user_id,
            group = %group_name(self.conversation_id),
            "WebSocket session started"
        );
        WS_CONNECTIONS.inc();
        self.hb(ctx);

        if let Some(rx) = self.inbox.take() {
            ctx.add_message_stream(UnboundedReceiverStream::new(rx).map(BroadcastMessage));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user_id = self.user_id,
            group = %group_name(self.conversation_id),
            "WebSocket session stopped"
        );
        WS_CONNECTIONS.dec();

        let registry = self.registry.clone();
        let conversation_id = self.conversation_id;
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry
                .remove_subscriber(conversation_id, subscriber_id)
                .await;
        });
    }
}

impl Handler<BroadcastMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: BroadcastMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsInboundEvent>(&text) {
                Ok(WsInboundEvent::MessageSend { text, files }) => {
                    self.handle_send(text, files, ctx);
                }
                Ok(WsInboundEvent::Typing) => {
                    let delivery = self.delivery.clone();
                    let conversation_id = self.conversation_id;
                    let user_id = self.user_id;
                    actix::spawn(async move {
                        delivery.typing(conversation_id, user_id).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse WS message");
                    ctx.text(
                        WsOutboundEvent::Error {
                            reason: "Invalid event".to_string(),
                        }
                        .to_json(),
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// GET /ws/conversations/{id}
///
/// Authenticate, check participation, then join the conversation's group.
/// Refused connections are never registered.
#[get("/ws/conversations/{id}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let conversation_id = path.into_inner();

    let token = query.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
    });
    let actor = match token.as_deref().map(|t| state.jwt.validate(t)) {
        Some(Ok(actor)) => actor,
        Some(Err(e)) => {
            tracing::warn!(error = %e, conversation_id, "WebSocket connection rejected: invalid token");
            return Err(AppError::Unauthorized.into());
        }
        None => {
            tracing::warn!(conversation_id, "WebSocket connection rejected: no token");
            return Err(AppError::Unauthorized.into());
        }
    };

    if let Err(e) =
        ConversationMember::verify(state.store.as_ref(), actor.user_id, conversation_id).await
    {
        tracing::warn!(error = %e, user_id = actor.user_id, conversation_id, "WebSocket connection rejected");
        return Err(e.into());
    }

    let (subscriber_id, rx) = state.registry.add_subscriber(conversation_id).await;
    let session = WsSession {
        conversation_id,
        user_id: actor.user_id,
        subscriber_id,
        registry: state.registry.clone(),
        delivery: state.delivery.clone(),
        inbox: Some(rx),
        hb: Instant::now(),
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            state
                .registry
                .remove_subscriber(conversation_id, subscriber_id)
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_files_accepts_base64() {
        let files = decode_files(vec![InlineFile {
            name: "note.txt".into(),
            data: STANDARD.encode(b"hello"),
        }])
        .unwrap();
        assert_eq!(files[0].bytes, b"hello");
        assert_eq!(files[0].name, "note.txt");
    }

    #[test]
    fn decode_files_reports_bad_payload() {
        let err = decode_files(vec![InlineFile {
            name: "x.bin".into(),
            data: "***".into(),
        }])
        .unwrap_err();
        assert!(err.contains("x.bin"));
    }
}
