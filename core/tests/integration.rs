//! Transfers against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives connections through
//! the registry with the real `ureq` transport, polling the way a host would.
//! Covers memory and file destinations, resume negotiation, request bodies,
//! headers, redirects and connection failures end-to-end.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mock_server::pattern;
use urlclient_core::{ClientConfig, Connection, ConnectionState, ErrorKind, Registry};

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn open(registry: &Registry, method: &str, url: &str) -> Arc<Connection> {
    let id = registry.create(method, url, 0, 10.0);
    assert_ne!(id, 0);
    registry.lookup(id).unwrap()
}

/// Poll until the connection stops, as a host frame loop would.
fn wait_terminal(conn: &Connection) -> ConnectionState {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = conn.state();
        if state.is_terminal() {
            return state;
        }
        assert!(Instant::now() < deadline, "connection stuck in {state:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Drain the memory buffers while the transfer is still running.
fn drain(conn: &Connection, capacity: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = Vec::new();
    let mut buf = vec![0u8; capacity];
    loop {
        conn.check_and_reset_dirty();
        let count = conn.pull(&mut buf);
        out.extend_from_slice(&buf[..count]);
        if count == 0 && conn.state().is_terminal() && conn.pending_len() == 0 {
            return out;
        }
        assert!(Instant::now() < deadline, "drain did not finish");
        if count == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn body_text(conn: &Connection) -> String {
    conn.check_and_reset_dirty();
    let mut buf = vec![0u8; 64 * 1024];
    let count = conn.pull(&mut buf);
    String::from_utf8(buf[..count].to_vec()).unwrap()
}

#[test]
fn memory_get_delivers_all_bytes() {
    let base = start_server();
    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/bytes/10"));
    conn.add_acceptable_status_range(200, 299);
    assert!(conn.send());

    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(conn.status_code(), 200);
    assert_eq!(conn.expected_content_length(), 10);
    assert_eq!(conn.bytes_read(), 10);

    let mut buf = [0u8; 1024];
    assert!(conn.check_and_reset_dirty());
    assert_eq!(conn.pull(&mut buf), 10);
    assert_eq!(&buf[..10], &pattern(10)[..]);
    assert!(!conn.check_and_reset_dirty());
}

#[test]
fn large_body_drained_while_streaming() {
    let base = start_server();
    let config = ClientConfig {
        chunk_size: 1000,
        ..ClientConfig::default()
    };
    let registry = Registry::new(config);
    let conn = open(&registry, "GET", &format!("{base}/bytes/200000"));
    conn.send();

    let body = drain(&conn, 4096);
    assert_eq!(conn.state(), ConnectionState::Finished);
    assert_eq!(body.len(), 200_000);
    assert_eq!(body, pattern(200_000));
}

#[test]
fn resume_appends_missing_range() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.bin");
    std::fs::write(&path, &pattern(150)[..100]).unwrap();

    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/bytes/150"));
    conn.set_destination(&path, true);
    conn.add_acceptable_status_range(200, 299);
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(conn.status_code(), 206);
    assert_eq!(conn.bytes_resumed(), 100);
    assert_eq!(conn.bytes_read(), 50);
    assert_eq!(std::fs::read(&path).unwrap(), pattern(150));
}

#[test]
fn resume_past_end_deletes_partial_file() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("complete.bin");
    std::fs::write(&path, pattern(100)).unwrap();

    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/bytes/100"));
    conn.set_destination(&path, true);
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.status_code(), 416);
    assert_eq!(conn.error(), Some(ErrorKind::InvalidResumeOffset));
    assert_eq!(conn.error_code(), 7);
    assert!(!path.exists());
}

#[test]
fn resume_against_server_without_ranges_restarts() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restart.bin");
    std::fs::write(&path, b"stale").unwrap();

    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/norange/20"));
    conn.set_destination(&path, true);
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(conn.bytes_resumed(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), pattern(20));
}

#[test]
fn post_bytes_are_echoed() {
    let base = start_server();
    let registry = Registry::default();
    let conn = open(&registry, "POST", &format!("{base}/echo"));
    conn.set_request_header("Content-Type", "text/plain");
    conn.set_body_bytes(b"hello transfer".to_vec());
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(body_text(&conn), "hello transfer");
    let content_type = (0..conn.header_count())
        .find(|&i| conn.header_name(i).as_deref() == Some("content-type"))
        .and_then(|i| conn.header_value(i));
    assert_eq!(content_type.as_deref(), Some("text/plain"));
}

#[test]
fn file_upload_round_trip() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("upload.bin");
    std::fs::write(&src, pattern(5000)).unwrap();

    let registry = Registry::default();
    let upload = open(&registry, "POST", &format!("{base}/uploads"));
    upload.set_body_file(&src);
    upload.add_acceptable_status_range(201, 201);
    upload.send();
    assert_eq!(wait_terminal(&upload), ConnectionState::Finished);

    let created: serde_json::Value = serde_json::from_str(&body_text(&upload)).unwrap();
    assert_eq!(created["length"], 5000);
    let id = created["id"].as_str().unwrap();

    let dst = dir.path().join("download.bin");
    let download = open(&registry, "GET", &format!("{base}/uploads/{id}"));
    download.set_destination(&dst, false);
    download.send();
    assert_eq!(wait_terminal(&download), ConnectionState::Finished);
    assert_eq!(std::fs::read(&dst).unwrap(), pattern(5000));
}

#[test]
fn request_headers_and_credentials_are_sent() {
    let base = start_server();
    let registry = Registry::new(ClientConfig {
        user_agent: Some("urlclient-test".to_string()),
        ..ClientConfig::default()
    });
    let id = registry.create("GET", &format!("{base}/headers"), 1, 10.0);
    let conn = registry.lookup(id).unwrap();
    conn.set_request_header("X-Token", "first");
    conn.set_request_header("X-Token", "second");
    conn.set_auth_credential("user", "pass");
    conn.send();
    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);

    let seen: serde_json::Value = serde_json::from_str(&body_text(&conn)).unwrap();
    assert_eq!(seen["x-token"], "second");
    assert_eq!(seen["authorization"], "Basic dXNlcjpwYXNz");
    assert_eq!(seen["user-agent"], "urlclient-test");
    assert_eq!(seen["cache-control"], "no-cache");
    assert_eq!(seen["pragma"], "no-cache");
}

#[test]
fn repeated_response_headers_are_grouped() {
    let base = start_server();
    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/dup-headers"));
    conn.send();
    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);

    let index = (0..conn.header_count())
        .find(|&i| conn.header_name(i).as_deref() == Some("x-dup"))
        .unwrap();
    assert_eq!(conn.header_value(index).as_deref(), Some("one, two"));
    assert_eq!(conn.header_values(index).unwrap(), vec!["one", "two"]);
}

#[test]
fn unacceptable_status_cancels() {
    let base = start_server();
    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("{base}/status/500"));
    conn.add_acceptable_status_range(200, 299);
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.status_code(), 500);
    assert_eq!(conn.error(), Some(ErrorKind::UnacceptableStatusCode));
    assert_eq!(conn.error_domain(), Some(""));
}

#[test]
fn redirects_follow_limit_and_disable() {
    let base = start_server();
    let registry = Registry::default();

    let conn = open(&registry, "GET", &format!("{base}/redirect/2"));
    conn.send();
    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(conn.status_code(), 200);
    assert_eq!(conn.bytes_read(), 10);

    let conn = open(&registry, "GET", &format!("{base}/redirect/3"));
    conn.set_follow_redirects(true, 1);
    conn.send();
    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.error(), Some(ErrorKind::TooManyRedirects));

    let conn = open(&registry, "GET", &format!("{base}/redirect/1"));
    conn.set_follow_redirects(false, 0);
    conn.send();
    assert_eq!(wait_terminal(&conn), ConnectionState::Finished);
    assert_eq!(conn.status_code(), 307);
}

#[test]
fn refused_connection_latches_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = Registry::default();
    let conn = open(&registry, "GET", &format!("http://{addr}/bytes/10"));
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.error(), Some(ErrorKind::CannotConnectToHost));
    assert_eq!(conn.status_code(), 0);
}

/// Accept one connection, optionally send `reply`, then hold the socket open
/// without sending anything more until the returned sender is dropped.
fn start_stalling_server(reply: &'static [u8]) -> (String, std::sync::mpsc::Sender<()>) {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (release, held) = std::sync::mpsc::channel::<()>();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 4096];
        let _ = stream.read(&mut request);
        if !reply.is_empty() {
            stream.write_all(reply).unwrap();
            stream.flush().unwrap();
        }
        let _ = held.recv_timeout(Duration::from_secs(10));
    });
    (format!("http://{addr}"), release)
}

#[test]
fn silent_server_times_out() {
    let (base, _release) = start_stalling_server(b"");
    let registry = Registry::default();
    let id = registry.create("GET", &format!("{base}/bytes/10"), 0, 0.5);
    let conn = registry.lookup(id).unwrap();
    let started = Instant::now();
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.error(), Some(ErrorKind::ConnectionTimeout));
    assert_eq!(conn.status_code(), 0);
    assert_eq!(conn.bytes_read(), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn stalled_body_times_out_after_partial_data() {
    let (base, _release) = start_stalling_server(
        b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\ncontent-type: text/plain\r\n\r\nabc",
    );
    let registry = Registry::default();
    let id = registry.create("GET", &format!("{base}/bytes/10"), 0, 0.5);
    let conn = registry.lookup(id).unwrap();
    conn.send();

    assert_eq!(wait_terminal(&conn), ConnectionState::Cancelled);
    assert_eq!(conn.error(), Some(ErrorKind::ConnectionTimeout));
    assert_eq!(conn.status_code(), 200);
    assert_eq!(conn.bytes_read(), 3);
    assert_eq!(conn.expected_content_length(), 10);
}

#[test]
fn destroy_stops_a_running_download() {
    let base = start_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("destroyed.bin");

    let registry = Registry::new(ClientConfig {
        chunk_size: 512,
        ..ClientConfig::default()
    });
    let id = registry.create("GET", &format!("{base}/bytes/5000000"), 0, 10.0);
    let conn = registry.lookup(id).unwrap();
    conn.set_destination(&path, false);
    conn.send();
    registry.destroy(id);

    assert_eq!(conn.state(), ConnectionState::Cancelled);
    conn.join_worker();
    assert_eq!(conn.error(), None);
    assert!(registry.lookup(id).is_none());
    let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    assert_eq!(written, conn.bytes_read());
}
