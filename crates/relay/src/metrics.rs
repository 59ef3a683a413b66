use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    messages_published_total: AtomicU64,
    messages_blocked_total: Mutex<HashMap<String, u64>>,
    messages_deleted_total: AtomicU64,
    slow_consumer_evictions_total: AtomicU64,
    active_sessions: AtomicI64,
    active_rooms: AtomicU64,
}

const BLOCK_REASONS: [&str; 2] = ["rate_limited", "inappropriate_content"];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        let mut messages_blocked_total = HashMap::new();
        for reason in BLOCK_REASONS {
            messages_blocked_total.insert(reason.to_string(), 0);
        }

        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_rate_total: Mutex::new(HashMap::new()),
            messages_published_total: AtomicU64::new(0),
            messages_blocked_total: Mutex::new(messages_blocked_total),
            messages_deleted_total: AtomicU64::new(0),
            slow_consumer_evictions_total: AtomicU64::new(0),
            active_sessions: AtomicI64::new(0),
            active_rooms: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn record_ws_request(endpoint: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_request(endpoint, is_error, latency_ms);
    }
}

pub fn increment_messages_published() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_messages_published();
    }
}

pub fn increment_messages_blocked(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_messages_blocked(reason);
    }
}

pub fn increment_messages_deleted() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_messages_deleted();
    }
}

pub fn increment_slow_consumer_evictions() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_slow_consumer_evictions();
    }
}

pub fn session_connected() {
    if let Some(metrics) = global_metrics() {
        metrics.active_sessions.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn session_disconnected() {
    if let Some(metrics) = global_metrics() {
        metrics.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn set_active_rooms(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_rooms(count);
    }
}

impl RelayMetrics {
    pub fn record_http_request(
        &self,
        method: &str,
        path: &str,
        status_code: u16,
        latency_ms: u64,
    ) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_request(&self, endpoint: &str, is_error: bool, latency_ms: u64) {
        let normalized_endpoint = normalize_label(endpoint);
        increment_label_counter(&self.ws_rate_total, &normalized_endpoint, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &normalized_endpoint, latency_ms);
        increment_label_counter(&self.ws_duration_count, &normalized_endpoint, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &normalized_endpoint, 1);
        }
    }

    pub fn increment_messages_published(&self) {
        self.messages_published_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_messages_blocked(&self, reason: &str) {
        increment_label_counter(&self.messages_blocked_total, &normalize_label(reason), 1);
    }

    pub fn increment_messages_deleted(&self) {
        self.messages_deleted_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_slow_consumer_evictions(&self) {
        self.slow_consumer_evictions_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_active_rooms(&self, count: usize) {
        self.active_rooms.store(count as u64, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str(
            "# HELP relay_request_duration_ms_sum HTTP latency sum in ms by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str(
            "# HELP relay_request_duration_ms_count HTTP latency samples by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_rate_total Total websocket events by type.\n");
        output.push_str("# TYPE relay_ws_rate_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_rate_total",
            "endpoint",
            &self.ws_rate_total,
        );

        output.push_str(
            "# HELP relay_ws_errors_total Total websocket events answered with an error.\n",
        );
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_errors_total",
            "endpoint",
            &self.ws_errors_total,
        );

        output.push_str(
            "# HELP relay_ws_duration_ms_sum Websocket latency sum in ms by type.\n",
        );
        output.push_str("# TYPE relay_ws_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_duration_ms_sum",
            "endpoint",
            &self.ws_duration_sum_ms,
        );

        output.push_str(
            "# HELP relay_ws_duration_ms_count Count of websocket latency samples by type.\n",
        );
        output.push_str("# TYPE relay_ws_duration_ms_count counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_duration_ms_count",
            "endpoint",
            &self.ws_duration_count,
        );

        output.push_str("# HELP chat_messages_published_total Messages accepted into a room.\n");
        output.push_str("# TYPE chat_messages_published_total counter\n");
        output.push_str(&format!(
            "chat_messages_published_total {}\n",
            self.messages_published_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP chat_messages_blocked_total Messages rejected by moderation.\n");
        output.push_str("# TYPE chat_messages_blocked_total counter\n");
        append_label_counter_lines(
            &mut output,
            "chat_messages_blocked_total",
            "reason",
            &self.messages_blocked_total,
        );

        output.push_str("# HELP chat_messages_deleted_total Messages soft-deleted.\n");
        output.push_str("# TYPE chat_messages_deleted_total counter\n");
        output.push_str(&format!(
            "chat_messages_deleted_total {}\n",
            self.messages_deleted_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP chat_slow_consumer_evictions_total Sessions evicted on a full queue.\n",
        );
        output.push_str("# TYPE chat_slow_consumer_evictions_total counter\n");
        output.push_str(&format!(
            "chat_slow_consumer_evictions_total {}\n",
            self.slow_consumer_evictions_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP chat_active_sessions Connected chat sessions.\n");
        output.push_str("# TYPE chat_active_sessions gauge\n");
        output.push_str(&format!(
            "chat_active_sessions {}\n",
            self.active_sessions.load(Ordering::SeqCst).max(0)
        ));

        output.push_str("# HELP chat_active_rooms Rooms currently held by the registry.\n");
        output.push_str("# TYPE chat_active_rooms gauge\n");
        output.push_str(&format!(
            "chat_active_rooms {}\n",
            self.active_rooms.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_label(label: &str) -> String {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    if guard.is_empty() {
        return;
    }

    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
