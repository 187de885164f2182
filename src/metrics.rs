//! Prometheus-compatible metrics endpoint
//!
//! Exposes socket and sync counters of the client in Prometheus format.
//! Default endpoint: http://localhost:9091/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Samples kept for connect latency percentiles
const CONNECT_HISTORY: usize = 100;

/// Metrics registry for the sync client
#[derive(Debug)]
pub struct Metrics {
    // Connection
    pub connected: AtomicU64, // 0 or 1
    pub connect_attempts: AtomicU64,
    pub reconnects: AtomicU64,
    pub connect_time_ms: AtomicU64,
    pub connect_time_p95_ms: AtomicU64,

    // Outbound
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub messages_queued: AtomicU64,
    pub sends_dropped: AtomicU64,

    // Inbound
    pub frames_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub unhandled_messages: AtomicU64,
    pub server_errors: AtomicU64,

    // Store
    pub premoves_applied: AtomicU64,
    pub resyncs_requested: AtomicU64,
    pub inventory_polls: AtomicU64,

    start_time: Instant,

    connect_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connect_time_ms: AtomicU64::new(0),
            connect_time_p95_ms: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            sends_dropped: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            unhandled_messages: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            premoves_applied: AtomicU64::new(0),
            resyncs_requested: AtomicU64::new(0),
            inventory_polls: AtomicU64::new(0),
            start_time: Instant::now(),
            connect_history: RwLock::new(VecDeque::with_capacity(CONNECT_HISTORY)),
        }
    }

    /// Record time from connect to open and update the p95
    pub fn record_connect_time(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.connect_time_ms.store(ms, Ordering::Relaxed);

        let mut history = self.connect_history.write();
        history.push_back(ms);
        while history.len() > CONNECT_HISTORY {
            history.pop_front();
        }

        let mut sorted: Vec<u64> = history.iter().copied().collect();
        sorted.sort_unstable();
        let p95_idx = (sorted.len() as f32 * 0.95) as usize;
        self.connect_time_p95_ms
            .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Connection
        metric!("merge_sync_connected", "Socket open (0/1)", "gauge",
            self.connected.load(Ordering::Relaxed));
        metric!("merge_sync_connect_attempts_total", "Socket connect attempts", "counter",
            self.connect_attempts.load(Ordering::Relaxed));
        metric!("merge_sync_reconnects_total", "Scheduled reconnects", "counter",
            self.reconnects.load(Ordering::Relaxed));
        metric!("merge_sync_connect_time_milliseconds", "Last connect latency", "gauge",
            self.connect_time_ms.load(Ordering::Relaxed));
        metric!("merge_sync_connect_time_p95_milliseconds", "95th percentile connect latency", "gauge",
            self.connect_time_p95_ms.load(Ordering::Relaxed));

        // Outbound
        metric!("merge_sync_frames_sent_total", "Frames written to the socket", "counter",
            self.frames_sent.load(Ordering::Relaxed));
        metric!("merge_sync_bytes_sent_total", "Bytes written to the socket", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("merge_sync_messages_queued_total", "Messages queued while connecting", "counter",
            self.messages_queued.load(Ordering::Relaxed));
        metric!("merge_sync_sends_dropped_total", "Messages dropped without a socket", "counter",
            self.sends_dropped.load(Ordering::Relaxed));

        // Inbound
        metric!("merge_sync_frames_received_total", "Frames read from the socket", "counter",
            self.frames_received.load(Ordering::Relaxed));
        metric!("merge_sync_bytes_received_total", "Bytes read from the socket", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("merge_sync_malformed_frames_total", "Frames that failed to decode", "counter",
            self.malformed_frames.load(Ordering::Relaxed));
        metric!("merge_sync_unhandled_messages_total", "Messages with no listener", "counter",
            self.unhandled_messages.load(Ordering::Relaxed));
        metric!("merge_sync_server_errors_total", "Error envelopes from the server", "counter",
            self.server_errors.load(Ordering::Relaxed));

        // Store
        metric!("merge_sync_premoves_total", "Optimistic mutations applied", "counter",
            self.premoves_applied.load(Ordering::Relaxed));
        metric!("merge_sync_resyncs_total", "Full inventory requests after a bad push", "counter",
            self.resyncs_requested.load(Ordering::Relaxed));
        metric!("merge_sync_inventory_polls_total", "Backstop inventory polls", "counter",
            self.inventory_polls.load(Ordering::Relaxed));

        metric!("merge_sync_uptime_seconds", "Client uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        format!(r#"{{
  "connection": {{
    "connected": {},
    "attempts": {},
    "reconnects": {},
    "connect_time_ms": {},
    "connect_time_p95_ms": {}
  }},
  "outbound": {{
    "frames": {},
    "bytes": {},
    "queued": {},
    "dropped": {}
  }},
  "inbound": {{
    "frames": {},
    "bytes": {},
    "malformed": {},
    "unhandled": {},
    "server_errors": {}
  }},
  "store": {{
    "premoves": {},
    "resyncs": {},
    "inventory_polls": {}
  }},
  "uptime_seconds": {}
}}"#,
            self.connected.load(Ordering::Relaxed),
            self.connect_attempts.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.connect_time_ms.load(Ordering::Relaxed),
            self.connect_time_p95_ms.load(Ordering::Relaxed),
            self.frames_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.messages_queued.load(Ordering::Relaxed),
            self.sends_dropped.load(Ordering::Relaxed),
            self.frames_received.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.malformed_frames.load(Ordering::Relaxed),
            self.unhandled_messages.load(Ordering::Relaxed),
            self.server_errors.load(Ordering::Relaxed),
            self.premoves_applied.load(Ordering::Relaxed),
            self.resyncs_requested.load(Ordering::Relaxed),
            self.inventory_polls.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = render_response(&metrics, &request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

/// Route a raw HTTP request to a response
fn render_response(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.frames_sent.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.connected.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_connect_time() {
        let metrics = Metrics::new();
        for i in 0..20 {
            metrics.record_connect_time(Duration::from_millis(10 + i * 5));
        }

        assert_eq!(metrics.connect_time_ms.load(Ordering::Relaxed), 105);
        assert_eq!(metrics.connect_time_p95_ms.load(Ordering::Relaxed), 105);
    }

    #[test]
    fn test_history_bounded() {
        let metrics = Metrics::new();
        for _ in 0..(CONNECT_HISTORY * 2) {
            metrics.record_connect_time(Duration::from_millis(1));
        }
        assert_eq!(metrics.connect_history.read().len(), CONNECT_HISTORY);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_frame_sent(12);
        metrics.record_frame_sent(8);
        Metrics::incr(&metrics.sends_dropped);

        let output = metrics.to_prometheus();

        assert!(output.contains("merge_sync_frames_sent_total 2"));
        assert!(output.contains("merge_sync_bytes_sent_total 20"));
        assert!(output.contains("merge_sync_sends_dropped_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.record_frame_received(40);

        let output = metrics.to_json();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["inbound"]["frames"], 1);
        assert_eq!(value["inbound"]["bytes"], 40);
        assert_eq!(value["connection"]["connected"], 0);
    }

    #[test]
    fn test_render_routes() {
        let metrics = Metrics::new();

        assert!(render_response(&metrics, "GET /metrics HTTP/1.1").contains("merge_sync_uptime_seconds"));
        assert!(render_response(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(render_response(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(render_response(&metrics, "GET /other HTTP/1.1").starts_with("HTTP/1.1 404"));
    }
}
