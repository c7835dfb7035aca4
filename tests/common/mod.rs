//! Shared helpers for the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use replay_hub::clock::now_millis;
use replay_hub::config::{Connection, HubConfig};
use replay_hub::parser::{LineParser, XioParser};
use replay_hub::writer::SinkWriter;
use replay_hub::{Event, HubResult, Timestamp, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Sink that remembers every written event.
#[derive(Default)]
pub struct CollectingSink {
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl SinkWriter for CollectingSink {
    fn kind(&self) -> Connection {
        Connection::NetworkBus
    }

    fn initialize(&mut self) -> HubResult<()> {
        Ok(())
    }

    fn write(&mut self, event: &Event) -> HubResult<Option<Timestamp>> {
        self.events.lock().push(event.clone());
        Ok(Some(now_millis()))
    }

    fn close(&mut self) -> HubResult<()> {
        Ok(())
    }
}

/// Write a raw log with one `sflong` event per timestamp.
pub fn write_log(path: &Path, times: impl IntoIterator<Item = i64>) {
    let parser = XioParser::new();
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "<?xml version=\"1.0\"?>").unwrap();
    writeln!(file, "<!-- synthetic -->").unwrap();
    writeln!(file, "<replay>").unwrap();
    for t in times {
        let event = Event::new(Value::Long(t), "synthetic", "counter", t);
        writeln!(file, "{}", parser.format(&event)).unwrap();
    }
    writeln!(file, "</replay>").unwrap();
}

/// Replay `path` without console or RPC.
pub fn replay_config(path: &Path) -> HubConfig {
    HubConfig {
        input: Connection::Disk,
        output: Connection::NetworkBus,
        file: path.to_path_buf(),
        console: false,
        no_rpc: true,
        silent: true,
        ..HubConfig::default()
    }
}

/// Poll `cond` for up to `timeout`.
pub fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
