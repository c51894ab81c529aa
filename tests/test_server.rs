use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tinyserve::signals::{SIGALRM, SIGTERM};
use tinyserve::{RouteTable, Server, ServerConfig, ServerError, ServerOptions};

const INDEX: &[u8] = b"<html><body>index</body></html>";
const PAGE: &[u8] = b"<html><body>funny box</body></html>";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg";
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n not really a png";

struct TestServer {
    addr: SocketAddr,
    signals: mio::net::UnixStream,
    handle: JoinHandle<Result<(), ServerError>>,
    _root: tempfile::TempDir,
}

impl TestServer {
    fn send_signal(&mut self, signal: i32) {
        self.signals.write_all(&[signal as u8]).unwrap();
    }

    fn stop(mut self) -> Result<(), ServerError> {
        self.send_signal(SIGTERM);
        self.handle.join().unwrap()
    }
}

fn write_file(path: &Path, contents: &[u8], mode: u32) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn populated_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    write_file(&root.path().join("index.html"), INDEX, 0o644);
    write_file(&root.path().join("funny_box.html"), PAGE, 0o644);
    let resources = root.path().join("funny_mystery_box");
    fs::create_dir(&resources).unwrap();
    write_file(&resources.join("cat.jpg"), JPEG, 0o644);
    write_file(&resources.join("dog.png"), PNG, 0o644);
    root
}

fn launch(root: tempfile::TempDir, routes: RouteTable, options: ServerOptions) -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        root: root.path().to_path_buf(),
        routes,
        ..ServerConfig::default()
    };
    let site = config.load_site().unwrap();
    let listener = config.bind().unwrap();
    let (reader, writer) = mio::net::UnixStream::pair().unwrap();
    let server = Server::new(listener, reader, site, options).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = thread::spawn(move || server.run());
    TestServer {
        addr,
        signals: writer,
        handle,
        _root: root,
    }
}

fn start_with(root: tempfile::TempDir, routes: RouteTable, workers: usize) -> TestServer {
    let options = ServerOptions {
        workers,
        table_capacity: Some(4096),
        ..ServerOptions::default()
    };
    launch(root, routes, options)
}

fn start() -> TestServer {
    start_with(populated_root(), RouteTable::default(), 4)
}

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn read_reply(mut stream: TcpStream) -> Reply {
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut response = httparse::Response::new(&mut headers);
    let httparse::Status::Complete(offset) = response.parse(&raw).unwrap() else {
        panic!("incomplete response: {:?}", String::from_utf8_lossy(&raw));
    };
    Reply {
        status: response.code.unwrap(),
        headers: response
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
            .collect(),
        body: raw[offset..].to_vec(),
    }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
}

// Collects bytes until the peer closes or resets the connection.
fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(count) => out.extend_from_slice(&chunk[..count]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    out
}

fn request(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = connect(addr);
    stream.write_all(raw).unwrap();
    read_reply(stream)
}

fn get(addr: SocketAddr, path: &str) -> Reply {
    request(
        addr,
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes(),
    )
}

#[test]
fn test_index_is_served_for_root() {
    let server = start();
    let reply = get(server.addr, "/");

    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Type"), Some("text/html"));
    assert_eq!(reply.header("Content-Length"), Some(INDEX.len().to_string().as_str()));
    assert_eq!(reply.body, INDEX);
    server.stop().unwrap();
}

#[test]
fn test_secondary_page() {
    let server = start();
    let reply = get(server.addr, "/funny_box.html");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, PAGE);
    server.stop().unwrap();
}

#[test]
fn test_random_route_serves_an_image() {
    let server = start();
    for _ in 0..8 {
        let reply = get(server.addr, "/random_funny");
        assert_eq!(reply.status, 200);
        match reply.header("Content-Type") {
            Some("image/jpeg") => assert_eq!(reply.body, JPEG),
            Some("image/png") => assert_eq!(reply.body, PNG),
            other => panic!("unexpected content type {other:?}"),
        }
    }
    server.stop().unwrap();
}

#[test]
fn test_unknown_path_is_not_found() {
    let server = start();
    let reply = get(server.addr, "/index.html");
    assert_eq!(reply.status, 404);
    assert!(reply.body.is_empty());
    assert!(reply.header("Content-Length").is_none());
    server.stop().unwrap();
}

#[test]
fn test_malformed_requests_are_bad_requests() {
    let server = start();
    for raw in [
        &b"DELETE / HTTP/1.1\r\n\r\n"[..],
        b"GET / HTTP/1.0\r\n\r\n",
        b"GET  / HTTP/1.1\r\n\r\n",
        b"GET / HTTP/1.1\nHost: localhost\r\n\r\n",
        b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody",
    ] {
        let reply = request(server.addr, raw);
        assert_eq!(reply.status, 400, "request {:?}", String::from_utf8_lossy(raw));
        assert!(reply.body.is_empty());
    }
    server.stop().unwrap();
}

#[test]
fn test_post_without_body_is_served() {
    let server = start();
    let reply = request(server.addr, b"post / http/1.1\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, INDEX);
    server.stop().unwrap();
}

#[test]
fn test_request_split_across_writes() {
    let server = start();
    let mut stream = connect(server.addr);
    stream.write_all(b"GET /funny_box.html HT").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"TP/1.1\r\nHost: local").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"host\r\n\r\n").unwrap();

    let reply = read_reply(stream);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, PAGE);
    server.stop().unwrap();
}

#[test]
fn test_head_filling_the_window_is_rejected() {
    let server = start();
    let mut stream = connect(server.addr);
    let prefix = "GET / HTTP/1.1\r\nX-Filler: ";
    let raw = format!(
        "{prefix}{}",
        "a".repeat(tinyserve::READ_BUFFER_SIZE - prefix.len())
    );
    assert_eq!(raw.len(), tinyserve::READ_BUFFER_SIZE);
    stream.write_all(raw.as_bytes()).unwrap();

    assert_eq!(read_until_closed(&mut stream), b"HTTP/1.1 400 Bad Request\r\n\r\n");
    server.stop().unwrap();
}

#[test]
fn test_oversized_head_is_rejected() {
    let server = start();
    let mut stream = connect(server.addr);
    let filler = "a".repeat(tinyserve::READ_BUFFER_SIZE);
    let raw = format!("GET / HTTP/1.1\r\nX-Filler: {filler}\r\n\r\n");
    // The server may close before reading everything.
    let _ = stream.write_all(raw.as_bytes());

    let out = read_until_closed(&mut stream);
    assert!(
        out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"),
        "got {:?}",
        String::from_utf8_lossy(&out)
    );
    server.stop().unwrap();
}

#[test]
fn test_unreadable_page_is_forbidden() {
    let root = populated_root();
    fs::set_permissions(
        root.path().join("funny_box.html"),
        fs::Permissions::from_mode(0o600),
    )
    .unwrap();
    let server = start_with(root, RouteTable::default(), 2);

    assert_eq!(get(server.addr, "/funny_box.html").status, 403);
    assert_eq!(get(server.addr, "/").status, 200);
    server.stop().unwrap();
}

#[test]
fn test_directory_page_is_bad_request() {
    let root = populated_root();
    fs::set_permissions(
        root.path().join("funny_mystery_box"),
        fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    let routes = RouteTable {
        page_file: "funny_mystery_box".to_string(),
        ..RouteTable::default()
    };
    let server = start_with(root, routes, 2);
    assert_eq!(get(server.addr, "/funny_box.html").status, 400);
    server.stop().unwrap();
}

#[test]
fn test_empty_file_has_zero_length() {
    let root = populated_root();
    write_file(&root.path().join("index.html"), b"", 0o644);
    let server = start_with(root, RouteTable::default(), 2);

    let reply = get(server.addr, "/");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Length"), Some("0"));
    assert!(reply.body.is_empty());
    server.stop().unwrap();
}

#[test]
fn test_repeated_requests_are_identical() {
    let server = start();
    let first = get(server.addr, "/");
    let second = get(server.addr, "/");
    assert_eq!(first.status, second.status);
    assert_eq!(first.headers, second.headers);
    assert_eq!(first.body, second.body);
    server.stop().unwrap();
}

#[test]
fn test_more_clients_than_workers() {
    let server = start_with(populated_root(), RouteTable::default(), 2);
    let addr = server.addr;
    let clients: Vec<_> = (0..48)
        .map(|i| {
            thread::spawn(move || {
                let path = if i % 2 == 0 { "/" } else { "/funny_box.html" };
                (i, get(addr, path))
            })
        })
        .collect();

    for client in clients {
        let (i, reply) = client.join().unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, if i % 2 == 0 { INDEX } else { PAGE });
    }
    server.stop().unwrap();
}

#[test]
fn test_client_hanging_up_gets_nothing() {
    let server = start();
    let mut stream = connect(server.addr);
    stream.write_all(b"GET / HT").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out);
    assert!(out.is_empty());

    assert_eq!(get(server.addr, "/").status, 200);
    server.stop().unwrap();
}

#[test]
fn test_alarm_does_not_stop_the_server() {
    let mut server = start();
    server.send_signal(SIGALRM);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(get(server.addr, "/").status, 200);
    server.stop().unwrap();
}

#[test]
fn test_termination_signal_stops_the_loop() {
    let server = start();
    let addr = server.addr;
    assert_eq!(get(addr, "/").status, 200);

    // An idle connection left open is closed during shutdown.
    let mut idle = connect(addr);
    thread::sleep(Duration::from_millis(50));
    server.stop().unwrap();

    let mut out = Vec::new();
    let _ = idle.read_to_end(&mut out);
    assert!(out.is_empty());
}

#[test]
fn test_empty_connection_table_is_rejected() {
    let root = populated_root();
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        root: root.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let (reader, _writer) = mio::net::UnixStream::pair().unwrap();
    let options = ServerOptions {
        table_capacity: Some(0),
        ..config.server_options()
    };
    let result = Server::new(
        config.bind().unwrap(),
        reader,
        config.load_site().unwrap(),
        options,
    );
    assert!(matches!(result, Err(ServerError::EmptyTable)));
}

#[test]
fn test_full_worker_queue_drops_excess_connections() {
    let root = populated_root();
    let index: Vec<u8> = (0..256 * 1024).map(|i| b"<p>tinyserve</p>\n"[i % 17]).collect();
    write_file(&root.path().join("index.html"), &index, 0o644);
    let options = ServerOptions {
        workers: 1,
        queue_capacity: 1,
        table_capacity: Some(4096),
        ..ServerOptions::default()
    };
    let server = launch(root, RouteTable::default(), options);

    let mut clients: Vec<TcpStream> = (0..64).map(|_| connect(server.addr)).collect();
    for stream in &mut clients {
        // Dropped connections may refuse the write.
        let _ = stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    }

    let mut served = 0;
    for mut stream in clients {
        let out = read_until_closed(&mut stream);
        if out.is_empty() {
            continue;
        }
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut response = httparse::Response::new(&mut headers);
        let httparse::Status::Complete(offset) = response.parse(&out).unwrap() else {
            panic!("partial response of {} bytes", out.len());
        };
        assert_eq!(response.code, Some(200));
        assert_eq!(&out[offset..], &index[..]);
        served += 1;
    }
    assert!(served >= 1);
    server.stop().unwrap();
}

#[test]
fn test_descriptor_beyond_table_is_closed() {
    let options = ServerOptions {
        table_capacity: Some(3),
        ..ServerOptions::default()
    };
    let server = launch(populated_root(), RouteTable::default(), options);

    let mut stream = connect(server.addr);
    let _ = stream.write_all(b"GET / HTTP/1.1\r\n\r\n");
    assert!(read_until_closed(&mut stream).is_empty());
    server.stop().unwrap();
}
