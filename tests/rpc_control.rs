//! Remote control of a replay over TCP.

mod common;

use common::{replay_config, wait_for, write_log, CollectingSink};
use replay_hub::control::RpcResponse;
use replay_hub::Hub;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn call(&mut self, request: &str) -> RpcResponse {
        writeln!(self.writer, "{request}").unwrap();
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

#[test]
fn pause_play_seek_and_quit() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("remote.xio");
    write_log(&log, (0..500).map(|i| i * 20));

    let mut config = replay_config(&log);
    config.no_rpc = false;
    config.rpc_server_address = "127.0.0.1".into();
    config.rpc_server_port = 0;

    let sink = CollectingSink::default();
    let events = Arc::clone(&sink.events);
    let hub = Hub::builder(config).writer(Box::new(sink)).start().unwrap();
    let addr = hub.rpc_addr().unwrap();
    let ctx = Arc::clone(hub.context());
    let runner = std::thread::spawn(move || hub.run());

    let mut client = Client::connect(addr);
    assert!(wait_for(Duration::from_secs(5), || !events.lock().is_empty()));

    assert!(client.call(r#"{"method":"pause"}"#).ok);
    assert!(ctx.clock.is_paused());
    assert!(client.call(r#"{"method":"play"}"#).ok);
    assert!(!ctx.clock.is_paused());
    assert!(client.call(r#"{"method":"play_pause"}"#).ok);
    assert!(ctx.clock.is_paused());
    assert!(client.call(r#"{"method":"play_pause"}"#).ok);

    assert!(client.call(r#"{"method":"seek","params":8000}"#).ok);
    assert!(wait_for(Duration::from_secs(5), || {
        events.lock().iter().any(|e| e.time >= 8_000)
    }));

    let rejected = client.call(r#"{"method":"rewind"}"#);
    assert!(!rejected.ok);
    assert!(rejected.error.is_some());
    let garbage = client.call("not json");
    assert!(!garbage.ok);

    assert!(client.call(r#"{"method":"quit"}"#).ok);
    runner.join().unwrap().unwrap();
    assert!(ctx.shutdown_requested());
}

#[test]
fn taken_port_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("remote.xio");
    write_log(&log, 0..10);

    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = replay_config(&log);
    config.no_rpc = false;
    config.rpc_server_address = "127.0.0.1".into();
    config.rpc_server_port = blocker.local_addr().unwrap().port();

    let result = Hub::builder(config)
        .writer(Box::new(CollectingSink::default()))
        .start();
    assert!(matches!(result, Err(replay_hub::HubError::Bind { .. })));
}
