//! The hub controller.
//!
//! [`Hub`] wires one source reader and one sink writer to a shared
//! [`HubContext`], starts the control surfaces and then executes their
//! commands one at a time until it is told to quit (or the writer reports
//! an idle timeout).
//!
//! Startup order matters: the writer is started and initialized first, so
//! that no event read from the source is lost because the sink is not ready.
//!
//! # Example
//! ```no_run
//! use replay_hub::config::{Connection, HubConfig};
//! use replay_hub::hub::Hub;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig {
//!     input: Connection::Disk,
//!     output: Connection::NetworkBus,
//!     file: "session.xio.gz".into(),
//!     ..HubConfig::default()
//! };
//! Hub::builder(config).start()?.run()?;
//! # Ok(())
//! # }
//! ```

use crate::bus::{Bus, UdpBus, UdpBusSettings};
use crate::clock::{nice_time, now_millis};
use crate::config::{Connection, HubConfig};
use crate::context::HubContext;
use crate::control::console::HELP;
use crate::control::{command_channel, CommandSender, ConsoleControl, ControlRequest, HubCommand, RpcControl};
use crate::error::{HubError, HubResult};
use crate::event::Timestamp;
use crate::parser::LineParser;
use crate::reader::{DiskControl, DiskReader, NetworkReader, ReaderHandle, SocketReader, SourceReader};
use crate::writer::{DiskWriter, NetworkWriter, SinkWriter, WriterHandle};
use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COMMAND_POLL: Duration = Duration::from_millis(100);
const SHUTDOWN_REPORT: Duration = Duration::from_secs(1);

/// Configures optional parts of a [`Hub`] before starting it.
pub struct HubBuilder {
    config: HubConfig,
    parser: Option<Arc<dyn LineParser>>,
    bus: Option<Arc<dyn Bus>>,
    writer: Option<Box<dyn SinkWriter>>,
    console_input: Option<Box<dyn BufRead + Send>>,
    rpc: bool,
}

impl HubBuilder {
    /// Use a custom line parser instead of the XIO format.
    pub fn parser(mut self, parser: Arc<dyn LineParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Use this bus for the network connections instead of UDP.
    pub fn bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use this sink instead of the one selected by `output`.
    pub fn writer(mut self, writer: Box<dyn SinkWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Read console commands from `input` instead of stdin.
    pub fn console_input(mut self, input: Box<dyn BufRead + Send>) -> Self {
        self.console_input = Some(input);
        self
    }

    /// Enable or disable the RPC control independently of the configuration.
    pub fn rpc(mut self, enabled: bool) -> Self {
        self.rpc = enabled;
        self
    }

    fn bus_for(&mut self, ctx: &HubContext) -> HubResult<Arc<dyn Bus>> {
        if let Some(bus) = &self.bus {
            return Ok(Arc::clone(bus));
        }
        let settings = UdpBusSettings::from_config(&ctx.config)?;
        let bus: Arc<dyn Bus> = Arc::new(UdpBus::new(settings, Arc::clone(&ctx.parser)));
        self.bus = Some(Arc::clone(&bus));
        Ok(bus)
    }

    /// Start writer, reader and control surfaces, in that order.
    pub fn start(mut self) -> HubResult<Hub> {
        self.config.validate()?;
        let input = self.config.input;
        let output = self.config.output;
        let ctx = match self.parser.take() {
            Some(parser) => HubContext::with_parser(self.config.clone(), parser),
            None => HubContext::new(self.config.clone()),
        };
        info!(%input, %output, "starting hub");

        let sink: Box<dyn SinkWriter> = match self.writer.take() {
            Some(writer) => writer,
            None => match output {
                Connection::Disk => Box::new(DiskWriter::new(&ctx)),
                Connection::NetworkBus | Connection::RSBus => {
                    let bus = self.bus_for(&ctx)?;
                    Box::new(NetworkWriter::new(&ctx, bus, output))
                }
                Connection::SocketPort => {
                    return Err(HubError::Configuration("output: SocketPort is input only".into()))
                }
            },
        };
        debug!("waiting for initialization of writer");
        let writer = WriterHandle::spawn(sink, &ctx)?;

        let mut disk = None;
        let mut socket_addr = None;
        let source: Box<dyn SourceReader> = match input {
            Connection::Disk => {
                let (reader, control) = DiskReader::open(&ctx)?;
                disk = Some(control);
                Box::new(reader)
            }
            Connection::NetworkBus | Connection::RSBus => {
                let bus = self.bus_for(&ctx)?;
                Box::new(NetworkReader::subscribe(&ctx, bus.as_ref(), input)?)
            }
            Connection::SocketPort => {
                let reader = SocketReader::bind(&ctx)?;
                socket_addr = Some(reader.local_addr());
                Box::new(reader)
            }
        };
        let reader = ReaderHandle::spawn(source, &ctx)?;

        let (commands, requests) = command_channel();
        let rpc = if disk.is_some() && self.rpc {
            Some(RpcControl::spawn(&ctx, commands.clone())?)
        } else {
            None
        };
        let console = match self.console_input.take() {
            Some(input) => Some(ConsoleControl::with_input(input, &ctx, commands.clone())?),
            None if ctx.config.console => Some(ConsoleControl::spawn(&ctx, commands.clone())?),
            None => None,
        };

        info!(
            reader = reader.name(),
            writer = writer.name(),
            rpc = rpc.is_some(),
            console = console.is_some(),
            "hub started"
        );
        Ok(Hub {
            ctx,
            commands,
            requests,
            writer,
            reader,
            disk,
            socket_addr,
            console,
            rpc,
        })
    }
}

impl std::fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubBuilder")
            .field("input", &self.config.input)
            .field("output", &self.config.output)
            .field("custom_bus", &self.bus.is_some())
            .field("custom_writer", &self.writer.is_some())
            .field("rpc", &self.rpc)
            .finish()
    }
}

/// A running hub.
#[derive(Debug)]
pub struct Hub {
    ctx: Arc<HubContext>,
    commands: CommandSender,
    requests: Receiver<ControlRequest>,
    writer: WriterHandle,
    reader: ReaderHandle,
    disk: Option<DiskControl>,
    socket_addr: Option<SocketAddr>,
    console: Option<ConsoleControl>,
    rpc: Option<RpcControl>,
}

impl Hub {
    /// Builder for a hub using `config`.
    pub fn builder(config: HubConfig) -> HubBuilder {
        let rpc = !config.no_rpc;
        HubBuilder {
            config,
            parser: None,
            bus: None,
            writer: None,
            console_input: None,
            rpc,
        }
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<HubContext> {
        &self.ctx
    }

    /// Handle for sending commands from other threads.
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Address of the RPC control, if running.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc.as_ref().map(RpcControl::local_addr)
    }

    /// Address of the socket source, if that is the input.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.socket_addr
    }

    /// Execute commands until quit or idle timeout, then shut down.
    pub fn run(self) -> HubResult<()> {
        while !self.ctx.shutdown_requested() {
            match self.requests.recv_timeout(COMMAND_POLL) {
                Ok(request) => {
                    let outcome = self.execute(&request.command);
                    if let Err(e) = &outcome {
                        debug!(command = ?request.command, error = %e, "command not executed");
                    }
                    request.respond(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown()
    }

    /// Execute one command on the calling thread.
    pub fn execute(&self, command: &HubCommand) -> HubResult<()> {
        if !command.needs_disk_source() {
            return self.execute_common(command);
        }
        let messages = &self.ctx.messages;
        let clock = &self.ctx.clock;
        let Some(disk) = self.disk.as_ref() else {
            if matches!(command, HubCommand::TogglePause | HubCommand::SetPaused(_)) {
                warn!("pausing is only allowed if reading from disk");
                messages.reply("pausing is only allowed if reading from disk");
            } else {
                messages.reply("only available when reading from disk");
            }
            return Err(HubError::Unavailable(format!("{command:?}")));
        };

        match command {
            HubCommand::TogglePause => self.set_paused(!clock.is_paused()),
            HubCommand::SetPaused(paused) => self.set_paused(*paused),
            HubCommand::Seek(position) => {
                let origin = clock.shifted_first_line().ok_or_else(|| {
                    HubError::Unavailable("seek before the first line was read".into())
                })?;
                self.seek_to(disk, origin.saturating_add(*position));
                Ok(())
            }
            HubCommand::Skip(amount) => {
                let base = clock.last_pushed().unwrap_or_else(|| clock.replay_position());
                self.seek_to(disk, base.saturating_add(*amount));
                Ok(())
            }
            HubCommand::Reset => {
                messages.message("resetting");
                self.reset(disk)
            }
            HubCommand::ShowTime => {
                self.show_time();
                Ok(())
            }
            HubCommand::Offset(None) => {
                messages.reply(format!("Offset: {}", clock.replay_offset()));
                Ok(())
            }
            HubCommand::Offset(Some(offset)) => {
                clock.set_replay_offset(*offset);
                messages.message(format!("Offset set to {offset}"));
                Ok(())
            }
            HubCommand::ShowBuffer => {
                let stats = disk.stats();
                messages.reply(format!(
                    "log buffer:\n  First timestamp:     {}\n  Threshold timestamp: {}\n  Last timestamp:      {}\n  \
                     actual size: {}/{} items (threshold {} items), cursor at {}\n  \
                     {:.0} bytes/s estimated, fast seek {}{}",
                    show(stats.first),
                    show(stats.threshold_timestamp),
                    show(stats.last),
                    stats.size,
                    stats.capacity,
                    stats.threshold,
                    stats.cursor,
                    stats.bytes_per_second,
                    if stats.fast_seek { "on" } else { "off" },
                    if stats.scanning { ", seeking" } else { "" },
                ));
                Ok(())
            }
            HubCommand::SaveLag => self.save_lag(),
            HubCommand::ShowFirstLine => {
                messages.reply(format!("Timestamp of first line: {}", show(clock.first_line())));
                Ok(())
            }
            HubCommand::ShowLastLine => {
                messages.reply(format!("Timestamp of last line: {}", show(clock.last_line())));
                Ok(())
            }
            other => self.execute_common(other),
        }
    }

    fn execute_common(&self, command: &HubCommand) -> HubResult<()> {
        let messages = &self.ctx.messages;
        match command {
            HubCommand::Quit => {
                messages.message("got quit command");
                self.ctx.request_shutdown("quit command");
            }
            HubCommand::Help => messages.reply(HELP),
            HubCommand::ToggleMessages => {
                if messages.toggle() {
                    messages.message("Messages enabled");
                } else {
                    messages.reply("Messages disabled");
                }
            }
            HubCommand::ShowQueue => {
                let summary = self.ctx.queue.summary();
                messages.reply(format!(
                    "delay queue: {} events (capacity {}), first {}, last {}, epoch {}",
                    summary.size,
                    self.ctx
                        .queue
                        .capacity()
                        .map_or_else(|| "unbounded".to_string(), |c| c.to_string()),
                    show(summary.first),
                    show(summary.last),
                    self.ctx.queue.epoch(),
                ));
            }
            HubCommand::ShowConfig => messages.reply(self.ctx.config.to_toml()),
            HubCommand::ShowLastWritten => messages.reply(format!(
                "timestamp of last written event: {}",
                show(self.ctx.clock.last_pushed())
            )),
            other => return Err(HubError::Unavailable(format!("{other:?}"))),
        }
        Ok(())
    }

    fn set_paused(&self, paused: bool) -> HubResult<()> {
        let clock = &self.ctx.clock;
        let messages = &self.ctx.messages;
        if paused {
            if !clock.begin_pause() {
                return Ok(());
            }
            match clock.first_line() {
                Some(first) => {
                    let at = clock.replay_position() - first + clock.replay_offset();
                    messages.message(format!(
                        "Replay paused at {}. Enter 'p' to continue.",
                        nice_time(at)
                    ));
                }
                None => messages.message("Replay paused. Enter 'p' to continue."),
            }
            self.writer.pause();
            self.reader.pause();
        } else if let Some(paused_for) = clock.end_pause() {
            info!(paused_ms = paused_for, "continuing replay");
            messages.message("continuing replay");
            self.writer.proceed();
            self.reader.proceed();
            self.ctx.queue.wake();
        }
        Ok(())
    }

    /// Seek to an absolute recorded timestamp.
    fn seek_to(&self, disk: &DiskControl, target: Timestamp) {
        let clock = &self.ctx.clock;
        clock.set_replay_delay(now_millis() - target);
        let epoch = self.ctx.queue.reset();
        clock.clear_last_pushed();
        disk.seek(target, epoch);
        clock.restart_pause();
        self.ctx.queue.wake();
        info!(target, epoch, "seeking");
    }

    fn reset(&self, disk: &DiskControl) -> HubResult<()> {
        let clock = &self.ctx.clock;
        let first = clock
            .first_line()
            .ok_or_else(|| HubError::Unavailable("reset before the first line was read".into()))?;
        let epoch = self.ctx.queue.reset();
        clock.clear_last_pushed();
        disk.seek(first, epoch);
        self.set_paused(false)?;
        clock.align_to(first);
        self.ctx.queue.wake();
        Ok(())
    }

    fn show_time(&self) {
        let clock = &self.ctx.clock;
        let messages = &self.ctx.messages;
        let position = clock.replay_position();
        let mut text = format!(
            "wall clock:      {}\nreplay position: {position}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );
        if let Some(first) = clock.first_line() {
            let relative = position - first + clock.replay_offset();
            text.push_str(&format!(" ({})", nice_time(relative)));
        }
        match (clock.last_pushed(), clock.first_line()) {
            (Some(pushed), Some(first)) => {
                let written = pushed - first + clock.replay_offset();
                text.push_str(&format!("\nlast written:    {}", nice_time(written)));
            }
            _ => text.push_str("\nno data written"),
        }
        messages.reply(text);
    }

    fn save_lag(&self) -> HubResult<()> {
        let messages = &self.ctx.messages;
        if !self.ctx.config.lag_history {
            messages.reply("Lag logging history is not enabled.");
            return Err(HubError::Unavailable("savelag".into()));
        }
        self.set_paused(true)?;
        let path = &self.ctx.config.lag_log_file;
        messages.message(format!("saving lag data to {}", path.display()));
        let saved = self.writer.save_lag(path, self.ctx.clock.first_line())?;
        messages.message(format!("saved {saved} lag measurements"));
        Ok(())
    }

    /// Stop every component and wait until all of them finished.
    pub fn shutdown(self) -> HubResult<()> {
        info!("shutting down");
        if let Some(console) = &self.console {
            console.stop();
        }
        if let Some(rpc) = &self.rpc {
            rpc.stop();
        }
        self.reader.stop();
        self.writer.stop();

        let started = Instant::now();
        let mut last_report = Instant::now();
        loop {
            let mut waiting: Vec<&str> = Vec::new();
            if let Some(console) = &self.console {
                if !console.join_if_finished() {
                    waiting.push(console.name());
                }
            }
            if let Some(rpc) = &self.rpc {
                if !rpc.join_if_finished() {
                    waiting.push(rpc.name());
                }
            }
            if !self.reader.join_if_finished() {
                waiting.push(self.reader.name());
            }
            if !self.writer.join_if_finished() {
                waiting.push(self.writer.name());
            }
            if waiting.is_empty() {
                break;
            }
            if last_report.elapsed() >= SHUTDOWN_REPORT {
                self.ctx
                    .messages
                    .message(format!("waiting for shutdown of {}", waiting.join(", ")));
                last_report = Instant::now();
            }
            std::thread::sleep(COMMAND_POLL);
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "hub stopped");
        Ok(())
    }
}

fn show(timestamp: Option<Timestamp>) -> String {
    timestamp.map_or_else(|| "none".to_string(), |t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::event::{Event, Value};

    fn relay_hub(dir: &std::path::Path) -> (Hub, LocalBus) {
        let bus = LocalBus::new();
        let config = HubConfig {
            input: Connection::NetworkBus,
            output: Connection::Disk,
            file: dir.join("relay.xio"),
            write_raw: true,
            console: false,
            silent: true,
            ..HubConfig::default()
        };
        let hub = Hub::builder(config)
            .bus(Arc::new(bus.clone()))
            .start()
            .unwrap();
        (hub, bus)
    }

    #[test]
    fn replay_commands_need_a_disk_source() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _bus) = relay_hub(dir.path());
        assert!(matches!(
            hub.execute(&HubCommand::Seek(10)),
            Err(HubError::Unavailable(_))
        ));
        assert!(hub.ctx.messages.contains("only available when reading from disk"));
        assert!(hub.execute(&HubCommand::TogglePause).is_err());
        assert!(hub.ctx.messages.contains("pausing is only allowed"));
        assert!(hub.execute(&HubCommand::ShowQueue).is_ok());
        assert!(hub.ctx.messages.contains("delay queue: 0 events"));
        hub.shutdown().unwrap();
    }

    #[test]
    fn relays_live_events_and_quits() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, bus) = relay_hub(dir.path());
        let commands = hub.commands();
        let ctx = Arc::clone(hub.context());
        let runner = std::thread::spawn(move || hub.run());

        bus.publish(&Event::new(Value::Int(7), "glove", "finger", 1));
        for _ in 0..100 {
            if ctx.clock.last_pushed().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(ctx.clock.last_pushed().is_some());
        commands
            .request(HubCommand::Quit, Duration::from_secs(2))
            .unwrap();
        runner.join().unwrap().unwrap();

        let text = std::fs::read_to_string(dir.path().join("relay.xio")).unwrap();
        assert!(text.contains(r#"sensorName="glove/finger""#), "{text}");
        assert!(text.trim_end().ends_with("</replay>"));
    }

    #[test]
    fn start_applies_full_config_validation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("short.xio");
        std::fs::write(&log, "<?xml version=\"1.0\"?>\n<!-- x -->\n").unwrap();
        let config = HubConfig {
            file: log,
            buffer_capacity: 10,
            buffer_threshold: 20,
            console: false,
            no_rpc: true,
            ..HubConfig::default()
        };
        match Hub::builder(config).start() {
            Err(HubError::Configuration(reason)) => assert!(reason.contains("buffer_threshold"), "{reason}"),
            other => panic!("unexpected result: {other:?}"),
        }

        let missing = HubConfig {
            file: dir.path().join("absent.xio"),
            console: false,
            no_rpc: true,
            ..HubConfig::default()
        };
        assert!(matches!(
            Hub::builder(missing).start(),
            Err(HubError::Configuration(_))
        ));
    }

    #[test]
    fn same_source_and_target_is_rejected() {
        let config = HubConfig {
            input: Connection::Disk,
            output: Connection::Disk,
            console: false,
            ..HubConfig::default()
        };
        assert!(matches!(
            Hub::builder(config).start(),
            Err(HubError::Configuration(_))
        ));
    }
}
