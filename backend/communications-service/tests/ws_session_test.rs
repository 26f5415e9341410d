mod common;

use std::time::Duration;

use actix_middleware::Role;
use actix_web::{web, App, HttpServer};
use common::{TestContext, PARENT, TEACHER};
use communications_service::routes;
use communications_service::state::AppState;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve the routes on an ephemeral port and return it
fn serve(state: AppState) -> u16 {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(|c| routes::configure(c, &state))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .expect("bind");
    let port = server.addrs()[0].port();
    actix_web::rt::spawn(server.run());
    port
}

async fn connect(port: u16, conversation_id: i64, token: &str) -> Client {
    let url = format!("ws://127.0.0.1:{port}/ws/conversations/{conversation_id}?token={token}");
    let (client, _) = connect_async(url).await.expect("websocket connect");
    client
}

/// Next text frame as JSON, skipping control frames
async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("event is JSON");
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                _ => return String::new(),
            }
        }
    })
    .await;
    assert!(waited.is_err(), "unexpected event {waited:?}");
}

async fn send(client: &mut Client, event: Value) {
    client
        .send(WsMessage::Text(event.to_string().into()))
        .await
        .expect("send");
}

#[actix_web::test]
async fn message_send_reaches_every_participant() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let port = serve(ctx.state.clone());

    let mut teacher = connect(port, conversation_id, &ctx.token(TEACHER, Role::Teacher, "mrs.bello")).await;
    let mut parent = connect(port, conversation_id, &ctx.token(PARENT, Role::Parent, "tunde")).await;
    assert_eq!(ctx.state.registry.subscriber_count(conversation_id).await, 2);

    send(
        &mut teacher,
        json!({
            "type": "message.send",
            "text": "Field trip on Friday",
            "files": [{"name": "permission slip.txt", "data": "c2lnbiBoZXJl"}],
        }),
    )
    .await;

    for client in [&mut teacher, &mut parent] {
        let event = next_event(client).await;
        assert_eq!(event["type"], "message.broadcast");
        assert_eq!(event["message"]["content"], "Field trip on Friday");
        assert_eq!(event["message"]["sender_id"], TEACHER);
        assert_eq!(event["message"]["sender_username"], "Funmi Bello");
        assert_eq!(event["message"]["attachments"][0]["name"], "permission slip.txt");
    }
    assert_eq!(ctx.store.message_count().await, 1);
}

#[actix_web::test]
async fn typing_fans_out_to_the_group() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let port = serve(ctx.state.clone());

    let mut teacher = connect(port, conversation_id, &ctx.token(TEACHER, Role::Teacher, "mrs.bello")).await;
    let mut parent = connect(port, conversation_id, &ctx.token(PARENT, Role::Parent, "tunde")).await;

    send(&mut parent, json!({"type": "typing"})).await;

    let event = next_event(&mut teacher).await;
    assert_eq!(
        event,
        json!({"type": "typing", "user_id": PARENT, "conversation_id": conversation_id})
    );
    assert_eq!(ctx.store.message_count().await, 0);
}

#[actix_web::test]
async fn bad_frames_get_an_error_event_for_the_sender_only() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let port = serve(ctx.state.clone());

    let mut teacher = connect(port, conversation_id, &ctx.token(TEACHER, Role::Teacher, "mrs.bello")).await;
    let mut parent = connect(port, conversation_id, &ctx.token(PARENT, Role::Parent, "tunde")).await;

    send(
        &mut teacher,
        json!({
            "type": "message.send",
            "text": "see attached",
            "files": [{"name": "marks.csv", "data": "***not base64***"}],
        }),
    )
    .await;
    let event = next_event(&mut teacher).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["reason"], "file marks.csv is not valid base64");

    send(&mut teacher, json!({"type": "dance"})).await;
    let event = next_event(&mut teacher).await;
    assert_eq!(event, json!({"type": "error", "reason": "Invalid event"}));

    assert_silent(&mut parent).await;
    assert_eq!(ctx.store.message_count().await, 0);
}

#[actix_web::test]
async fn closing_the_socket_deregisters_it() {
    let ctx = TestContext::new().await;
    let conversation_id = ctx.teacher_parent_conversation().await;
    let port = serve(ctx.state.clone());

    let mut parent = connect(port, conversation_id, &ctx.token(PARENT, Role::Parent, "tunde")).await;
    assert_eq!(ctx.state.registry.subscriber_count(conversation_id).await, 1);

    parent.close(None).await.expect("close");

    let mut remaining = 1;
    for _ in 0..50 {
        remaining = ctx.state.registry.subscriber_count(conversation_id).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}
