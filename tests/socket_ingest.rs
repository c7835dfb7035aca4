//! Socket input over a real TCP connection.

mod common;

use common::{wait_for, CollectingSink};
use replay_hub::config::{Connection, HubConfig};
use replay_hub::control::HubCommand;
use replay_hub::wire::frame;
use replay_hub::{Hub, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = r#"<?xml version="1.0"?>
<ports>
  <hand name="left">
    <grip type="sffloat"/>
    <closed type="sfbool"/>
    <fingers type="mfstring"/>
  </hand>
</ports>"#;

fn socket_hub(schema: &std::path::Path) -> (Hub, Arc<parking_lot::Mutex<Vec<replay_hub::Event>>>) {
    let config = HubConfig {
        input: Connection::SocketPort,
        output: Connection::NetworkBus,
        socket_port: 0,
        socket_schema_file: Some(schema.to_path_buf()),
        console: false,
        silent: true,
        ..HubConfig::default()
    };
    let sink = CollectingSink::default();
    let events = Arc::clone(&sink.events);
    let hub = Hub::builder(config).writer(Box::new(sink)).start().unwrap();
    (hub, events)
}

#[test]
fn records_become_events() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("ports.xml");
    std::fs::write(&schema, SCHEMA).unwrap();
    let (hub, events) = socket_hub(&schema);
    let addr = hub.socket_addr().unwrap();
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    let mut client = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    writeln!(client, "{}", frame("0.5, true, 3, index, middle, ring")).unwrap();
    writeln!(client, "{}", frame("0.75, false, 0")).unwrap();

    assert!(wait_for(Duration::from_secs(5), || events.lock().len() == 6));
    {
        let events = events.lock();
        let grips: Vec<&Value> = events
            .iter()
            .filter(|e| e.scope() == "left/grip")
            .map(|e| &e.value)
            .collect();
        assert_eq!(grips, vec![&Value::Float(0.5), &Value::Float(0.75)]);
        assert!(events
            .iter()
            .any(|e| e.scope() == "left/fingers" && e.value == Value::StringArray(vec!["index".into(), "middle".into(), "ring".into()])));
        assert!(events
            .iter()
            .any(|e| e.scope() == "left/fingers" && e.value == Value::StringArray(vec![])));
    }

    commands.request(HubCommand::Quit, Duration::from_secs(5)).unwrap();
    runner.join().unwrap().unwrap();
}

#[test]
fn corrupted_checksum_closes_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("ports.xml");
    std::fs::write(&schema, SCHEMA).unwrap();
    let (hub, events) = socket_hub(&schema);
    let addr = hub.socket_addr().unwrap();
    let ctx = Arc::clone(hub.context());
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    let mut client = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    writeln!(client, "12345, 0.5, true, 0").unwrap();

    // The hub hangs up; the read ends with EOF (or a reset).
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest);
    assert!(rest.is_empty());
    assert!(wait_for(Duration::from_secs(2), || ctx.messages.contains("does not match")));
    assert!(events.lock().is_empty());

    commands.request(HubCommand::Quit, Duration::from_secs(5)).unwrap();
    runner.join().unwrap().unwrap();
}
