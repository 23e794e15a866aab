//! HTTP/2 engine tests: `H2Client` against `H2Server` over plain TCP
//!
//! The handlers here are test doubles that exercise the engine (framing,
//! flow control, event delivery) independently of the application routes.

use h2longpoll::http::h2::*;
use h2longpoll::http::{FdSessionOps, Headers, SessionOps};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type EventLog = Arc<Mutex<Vec<String>>>;

/// Responds immediately and records every callback
struct Recorder {
    log: EventLog,
}

impl StreamHandler for Recorder {
    fn on_open(&mut self, headers: &Headers, ctx: &mut StreamContext) -> Subscriptions {
        self.log
            .lock()
            .unwrap()
            .push(format!("open {}", headers.path().unwrap_or("")));
        ctx.respond(200, &[("X-Test", "recorder")]);
        Subscriptions::all()
    }

    fn on_data(&mut self, data: &[u8], _ctx: &mut StreamContext) {
        self.log
            .lock()
            .unwrap()
            .push(format!("data {}", String::from_utf8_lossy(data)));
    }

    fn on_close(&mut self, _ctx: &mut StreamContext) {
        self.log.lock().unwrap().push("close".to_string());
    }

    fn on_error(&mut self, code: ErrorCode, _ctx: &mut StreamContext) {
        self.log.lock().unwrap().push(format!("error {}", code.name()));
    }
}

/// Responds with `size` bytes of body and ends the stream
struct Blob {
    size: usize,
}

impl StreamHandler for Blob {
    fn on_open(&mut self, _headers: &Headers, ctx: &mut StreamContext) -> Subscriptions {
        ctx.respond(200, &[]);
        ctx.end(vec![b'x'; self.size]);
        Subscriptions::none()
    }
}

/// Ends the stream from a timer, then tries to write again
struct Delayed {
    delay: Duration,
}

impl StreamHandler for Delayed {
    fn on_open(&mut self, _headers: &Headers, ctx: &mut StreamContext) -> Subscriptions {
        ctx.respond(202, &[]);
        ctx.arm_timer(self.delay);
        Subscriptions::none()
    }

    fn on_timer(&mut self, ctx: &mut StreamContext) {
        ctx.end("done");
        ctx.write("ignored");
    }
}

struct TestRoutes {
    log: EventLog,
}

impl Dispatch for TestRoutes {
    fn dispatch(&self, _stream_id: StreamId, headers: &Headers) -> Option<Box<dyn StreamHandler>> {
        match headers.path()? {
            "/record" => Some(Box::new(Recorder {
                log: Arc::clone(&self.log),
            })),
            "/blob" => Some(Box::new(Blob { size: 40_000 })),
            "/delayed" => Some(Box::new(Delayed {
                delay: Duration::from_millis(100),
            })),
            _ => None,
        }
    }
}

/// Serve one connection; the join handle yields the result of `serve`
fn spawn_server(log: EventLog) -> (u16, JoinHandle<Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().unwrap();
        let mut session = FdSessionOps::new(tcp_stream);
        session.set_nonblocking(true).unwrap();
        H2Server::new(session, Arc::new(TestRoutes { log })).serve()
    });

    (port, handle)
}

fn connect(port: u16, builder: H2ClientBuilder) -> H2Client<FdSessionOps> {
    let tcp_stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut client = builder.build(FdSessionOps::new(tcp_stream)).unwrap();
    client.connect().unwrap();
    client
}

fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Read until the server goes quiet so closing the socket sends FIN, not RST
fn drain(client: &mut H2Client<FdSessionOps>) {
    while client
        .next_event(Some(Duration::from_millis(200)))
        .unwrap()
        .is_some()
    {}
}

#[test]
fn test_settings_exchange() {
    let (port, _server) = spawn_server(new_log());
    let client = connect(port, H2ClientBuilder::new());

    let settings = client.remote_settings();
    assert_eq!(settings.get_max_concurrent_streams(), Some(100));
    assert_eq!(settings.get_initial_window_size(), 65535);
    assert_eq!(settings.get_max_frame_size(), 16384);
}

#[test]
fn test_response_headers_lowercased_with_date() {
    let (port, _server) = spawn_server(new_log());
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.open_stream("GET", "/record", &[], true).unwrap();
    let event = client.next_event(Some(Duration::from_secs(2))).unwrap();

    match event {
        Some(ClientEvent::Headers {
            stream_id: id,
            status,
            headers,
            end_stream,
        }) => {
            assert_eq!(id, stream_id);
            assert_eq!(status, Some(200));
            assert!(!end_stream);
            let names: Vec<_> = headers.iter().map(|(name, _)| name.to_string()).collect();
            assert_eq!(names, vec!["x-test", "date"]);
            assert!(httpdate::parse_http_date(headers.get("date").unwrap()).is_ok());
        }
        other => panic!("expected headers, got {:?}", other),
    }
}

#[test]
fn test_body_split_at_max_frame_size() {
    let (port, _server) = spawn_server(new_log());
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.get("/blob").unwrap();
    let response = client.collect_response(stream_id).unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body().len(), 40_000);
    assert_eq!(response.data_frames, 3);
}

#[test]
fn test_body_waits_for_window_updates() {
    let (port, _server) = spawn_server(new_log());
    let mut client = connect(port, H2ClientBuilder::new().initial_window_size(1000));

    let stream_id = client.get("/blob").unwrap();
    let response = client.collect_response(stream_id).unwrap();

    assert_eq!(response.body().len(), 40_000);
    assert!(response.body().iter().all(|b| *b == b'x'));
    assert!(response.data_frames >= 40);
}

#[test]
fn test_unhandled_stream_stays_silent() {
    let (port, _server) = spawn_server(new_log());
    let mut client = connect(port, H2ClientBuilder::new());

    client.get("/nobody").unwrap();
    assert_eq!(client.next_event(Some(Duration::from_millis(300))).unwrap(), None);
}

#[test]
fn test_timer_ends_stream_and_later_writes_are_dropped() {
    let (port, _server) = spawn_server(new_log());
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.get("/delayed").unwrap();
    let response = client.collect_response(stream_id).unwrap();

    assert_eq!(response.status(), 202);
    assert_eq!(response.body_string(), "done");
    assert_eq!(response.data_frames, 1);
    assert_eq!(client.next_event(Some(Duration::from_millis(200))).unwrap(), None);
}

#[test]
fn test_data_then_close_on_disconnect() {
    let log = new_log();
    let (port, server) = spawn_server(Arc::clone(&log));
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.open_stream("POST", "/record", &[], false).unwrap();
    client.send_data(stream_id, b"hello", false).unwrap();
    client.send_data(stream_id, b"world", false).unwrap();
    let event = client.next_event(Some(Duration::from_secs(2))).unwrap();
    assert!(matches!(event, Some(ClientEvent::Headers { .. })));
    drain(&mut client);
    drop(client);

    assert!(server.join().unwrap().is_ok());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["open /record", "data hello", "data world", "close"]
    );
}

#[test]
fn test_error_then_close_on_reset() {
    let log = new_log();
    let (port, server) = spawn_server(Arc::clone(&log));
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.open_stream("POST", "/record", &[], false).unwrap();
    client.next_event(Some(Duration::from_secs(2))).unwrap();
    client.reset_stream(stream_id, ErrorCode::Cancel).unwrap();
    drain(&mut client);
    drop(client);

    assert!(server.join().unwrap().is_ok());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["open /record", "error CANCEL", "close"]
    );
}

#[test]
fn test_reset_with_no_error_skips_error_event() {
    let log = new_log();
    let (port, server) = spawn_server(Arc::clone(&log));
    let mut client = connect(port, H2ClientBuilder::new());

    let stream_id = client.open_stream("POST", "/record", &[], false).unwrap();
    client.next_event(Some(Duration::from_secs(2))).unwrap();
    client.reset_stream(stream_id, ErrorCode::NoError).unwrap();
    drain(&mut client);
    drop(client);

    assert!(server.join().unwrap().is_ok());
    assert_eq!(*log.lock().unwrap(), vec!["open /record", "close"]);
}

#[test]
fn test_streams_are_independent() {
    let log = new_log();
    let (port, _server) = spawn_server(Arc::clone(&log));
    let mut client = connect(port, H2ClientBuilder::new());

    let silent = client.get("/nobody").unwrap();
    let delayed = client.get("/delayed").unwrap();
    let blob = client.get("/blob").unwrap();

    assert_eq!(client.collect_response(blob).unwrap().body().len(), 40_000);
    assert_eq!(client.collect_response(delayed).unwrap().body_string(), "done");
    // Nothing ever arrives for the unhandled stream
    while let Some(event) = client.next_event(Some(Duration::from_millis(200))).unwrap() {
        assert_ne!(event.stream_id(), silent);
    }
}
