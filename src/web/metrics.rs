use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

static STARTED_AT: OnceLock<Instant> = OnceLock::new();

static WEBHOOKS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static WEBHOOKS_IGNORED: AtomicU64 = AtomicU64::new(0);
static INBOUND_PROCESSED: AtomicU64 = AtomicU64::new(0);
static INBOUND_DUPLICATES: AtomicU64 = AtomicU64::new(0);
static OUTBOUND_SENT: AtomicU64 = AtomicU64::new(0);
static OUTBOUND_FAILED: AtomicU64 = AtomicU64::new(0);
static OUTBOUND_RETRIES: AtomicU64 = AtomicU64::new(0);
static DEAD_LETTERS: AtomicU64 = AtomicU64::new(0);
static BREAKER_TRANSITIONS: AtomicU64 = AtomicU64::new(0);
static BREAKER_REJECTIONS: AtomicU64 = AtomicU64::new(0);
static SENTIMENT_FALLBACKS: AtomicU64 = AtomicU64::new(0);
static REPLY_FALLBACKS: AtomicU64 = AtomicU64::new(0);
static TRIGGERS_FIRED: AtomicU64 = AtomicU64::new(0);
static DISPATCH_QUEUE_DEPTH: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    /// Pins the uptime origin; later calls are no-ops.
    pub fn start() {
        STARTED_AT.get_or_init(Instant::now);
    }

    pub fn webhook_received() {
        WEBHOOKS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_ignored() {
        WEBHOOKS_IGNORED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_processed() {
        INBOUND_PROCESSED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_duplicate() {
        INBOUND_DUPLICATES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_sent() {
        OUTBOUND_SENT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_failed() {
        OUTBOUND_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_retry() {
        OUTBOUND_RETRIES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_lettered() {
        DEAD_LETTERS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn breaker_transition() {
        BREAKER_TRANSITIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn breaker_rejection() {
        BREAKER_REJECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sentiment_fallback() {
        SENTIMENT_FALLBACKS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_fallback() {
        REPLY_FALLBACKS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trigger_fired() {
        TRIGGERS_FIRED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_dispatch_queue_depth(depth: u64) {
        DISPATCH_QUEUE_DEPTH.store(depth, Ordering::Relaxed);
    }
}

pub fn format_prometheus() -> String {
    let uptime = STARTED_AT
        .get()
        .map(|started| started.elapsed().as_secs())
        .unwrap_or(0);

    let counters: [(&str, &str, &str, u64); 15] = [
        (
            "hotelbot_uptime_seconds",
            "gauge",
            "Number of seconds the service has been running",
            uptime,
        ),
        (
            "hotelbot_webhooks_received_total",
            "counter",
            "Green API webhooks received",
            WEBHOOKS_RECEIVED.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_webhooks_ignored_total",
            "counter",
            "Webhooks acknowledged without processing",
            WEBHOOKS_IGNORED.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_inbound_processed_total",
            "counter",
            "Inbound guest messages processed",
            INBOUND_PROCESSED.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_inbound_duplicates_total",
            "counter",
            "Inbound messages dropped as already processed",
            INBOUND_DUPLICATES.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_outbound_sent_total",
            "counter",
            "Outbound messages delivered to Green API",
            OUTBOUND_SENT.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_outbound_failed_total",
            "counter",
            "Outbound messages that failed after retries",
            OUTBOUND_FAILED.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_outbound_retries_total",
            "counter",
            "Retried outbound gateway calls",
            OUTBOUND_RETRIES.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_dead_letters_total",
            "counter",
            "Messages moved to the dead letter queue",
            DEAD_LETTERS.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_breaker_transitions_total",
            "counter",
            "Circuit breaker state changes",
            BREAKER_TRANSITIONS.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_breaker_rejections_total",
            "counter",
            "Calls rejected by an open circuit breaker",
            BREAKER_REJECTIONS.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_sentiment_fallbacks_total",
            "counter",
            "Sentiment scores produced by the keyword fallback",
            SENTIMENT_FALLBACKS.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_reply_fallbacks_total",
            "counter",
            "Replies replaced by the canned fallback",
            REPLY_FALLBACKS.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_triggers_fired_total",
            "counter",
            "Trigger messages enqueued",
            TRIGGERS_FIRED.load(Ordering::Relaxed),
        ),
        (
            "hotelbot_dispatch_queue_depth",
            "gauge",
            "Jobs waiting in the outbound dispatcher",
            DISPATCH_QUEUE_DEPTH.load(Ordering::Relaxed),
        ),
    ];

    let mut output = String::new();
    for (name, kind, help, value) in counters {
        output.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
        ));
    }
    output
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(format_prometheus());
}
