//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves a single static body at any path. Behaviour is configurable: range
//! support (optionally for the probe only), injected 503s, truncated bodies,
//! slow chunked bodies, validators.
//! Every GET is logged with its Range and the peak number of concurrent
//! body transfers is recorded.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Honour Range only for the 0-0 probe; body requests get 200 with the full body.
    pub ranges_for_probe_only: bool,
    /// Omit Content-Length on 200 responses (size unknown until close).
    pub omit_length: bool,
    /// Answer this many body requests (not the 0-0 probe) with 503 first.
    pub fail_first: usize,
    /// Close this many body responses halfway through (after the 503s).
    pub truncate_first: usize,
    /// Sleep between chunks of `chunk` bytes while sending a body.
    pub chunk_delay: Option<Duration>,
    pub chunk: usize,
    /// Answer every request with this status and no body.
    pub status_override: Option<u16>,
    pub etag: Option<String>,
    pub content_disposition: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            ranges_for_probe_only: false,
            omit_length: false,
            fail_first: 0,
            truncate_first: 0,
            chunk_delay: None,
            chunk: 16 * 1024,
            status_override: None,
            etag: None,
            content_disposition: None,
        }
    }
}

/// What the server saw.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Range of each GET in arrival order: `None` when no Range was sent,
    /// `Some((start, None))` for an open-ended range.
    pub requests: Mutex<Vec<Option<(u64, Option<u64>)>>>,
    body_requests: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ServerStats {
    pub fn requests(&self) -> Vec<Option<(u64, Option<u64>)>> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests other than the one-byte probe.
    pub fn body_requests(&self) -> Vec<Option<(u64, Option<u64>)>> {
        self.requests()
            .into_iter()
            .filter(|r| *r != Some((0, Some(0))))
            .collect()
    }

    /// Most body transfers in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct RangeServer {
    /// URL of the served file, e.g. `http://127.0.0.1:12345/file.bin`.
    pub url: String,
    pub stats: Arc<ServerStats>,
}

/// Starts a server in a background thread serving `body`. The server runs until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let stats = Arc::new(ServerStats::default());
    let server_stats = Arc::clone(&stats);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let stats = Arc::clone(&server_stats);
            thread::spawn(move || handle(stream, &body, &opts, &stats));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/file.bin", port),
        stats,
    }
}

struct ActiveGuard<'a>(&'a ServerStats);

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a ServerStats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(stats)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            return None;
        }
    }
    String::from_utf8(buf).ok()
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions, stats: &ServerStats) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_head(&mut stream) else {
        return;
    };
    let (method, range) = parse_request(&request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    stats.requests.lock().unwrap().push(range);

    if let Some(code) = opts.status_override {
        let resp = format!("HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", code);
        let _ = stream.write_all(resp.as_bytes());
        return;
    }

    let is_probe = range == Some((0, Some(0)));
    let mut truncate = false;
    if !is_probe {
        let n = stats.body_requests.fetch_add(1, Ordering::SeqCst);
        if n < opts.fail_first {
            let _ = stream.write_all(
                b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        truncate = n < opts.fail_first + opts.truncate_first;
    }

    let total = body.len() as u64;
    let mut extra = String::new();
    if let Some(etag) = &opts.etag {
        extra.push_str(&format!("ETag: \"{}\"\r\n", etag));
    }
    if let Some(cd) = &opts.content_disposition {
        extra.push_str(&format!("Content-Disposition: {}\r\n", cd));
    }

    let (status, content_range, slice) = match range {
        Some((start, end)) if opts.support_ranges && (is_probe || !opts.ranges_for_probe_only) => {
            let end_incl = end.unwrap_or(u64::MAX).min(total.saturating_sub(1));
            if total == 0 || start > end_incl {
                let resp = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n{}Connection: close\r\n\r\n",
                    total, extra
                );
                let _ = stream.write_all(resp.as_bytes());
                return;
            }
            let slice = &body[start as usize..=end_incl as usize];
            (
                "206 Partial Content",
                Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                slice,
            )
        }
        _ => ("200 OK", None, body),
    };

    let mut head = format!("HTTP/1.1 {}\r\n", status);
    if let Some(cr) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", cr));
    }
    if !(opts.omit_length && status.starts_with("200")) {
        head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if opts.support_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    head.push_str(&extra);
    head.push_str("Connection: close\r\n\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    let _active = if is_probe { None } else { Some(ActiveGuard::enter(stats)) };
    let send = if truncate { &slice[..slice.len() / 2] } else { slice };
    for part in send.chunks(opts.chunk.max(1)) {
        if stream.write_all(part).is_err() {
            return;
        }
        if let Some(d) = opts.chunk_delay {
            thread::sleep(d);
        }
    }
    let _ = stream.flush();
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, Option<u64>)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(part) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim().parse::<u64>().ok();
                        range = Some((start, end));
                    }
                }
            }
        }
    }
    (method, range)
}
