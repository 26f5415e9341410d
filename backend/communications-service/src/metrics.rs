use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "communications_messages_delivered_total",
            "Messages persisted and broadcast, by origin",
        ),
        &["origin"],
    )
    .expect("failed to create communications_messages_delivered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communications_messages_delivered_total");
    counter
});

pub static EMPTY_SUBMISSIONS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "communications_empty_submissions_dropped_total",
        "Sends with no text and no files that were dropped",
    )
    .expect("failed to create communications_empty_submissions_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communications_empty_submissions_dropped_total");
    counter
});

pub static NOTIFICATION_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "communications_notification_failures_total",
        "Notification emails that could not be sent",
    )
    .expect("failed to create communications_notification_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communications_notification_failures_total");
    counter
});

pub static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "communications_ws_connections",
        "Live WebSocket connections",
    )
    .expect("failed to create communications_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register communications_ws_connections");
    gauge
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
