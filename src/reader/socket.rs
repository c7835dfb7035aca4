//! Ingest of checksummed records from a single inbound TCP client.

use super::{ReadStep, SourceReader};
use crate::clock::now_millis;
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::{HubError, HubResult};
use crate::schema::SlotSchema;
use crate::wire::{decode_line, WireError, WireSchema};
use crate::worker::WorkerControl;
use std::io::{self, BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const QUEUE_WAIT: Duration = Duration::from_millis(500);
/// Longest record line accepted from the client, terminator excluded.
pub const MAX_LINE: usize = 64 * 1024;

/// Listens on the socket port, accepts exactly one client and decodes its
/// records against the socket schema.
///
/// A protocol error ends the connection and with it the reader.
#[derive(Debug)]
pub struct SocketReader {
    ctx: Arc<HubContext>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    schema: WireSchema,
    client: Option<BufReader<TcpStream>>,
    partial: Vec<u8>,
}

impl SocketReader {
    /// Load the schema and bind the port. Both failures are fatal.
    pub fn bind(ctx: &Arc<HubContext>) -> HubResult<Self> {
        let schema_file = ctx.config.socket_schema_file.as_ref().ok_or_else(|| {
            HubError::Configuration("SocketPort input needs socket_schema_file".into())
        })?;
        let schema = WireSchema::from_schema(&SlotSchema::load(schema_file)?)?;

        let address = format!("0.0.0.0:{}", ctx.config.socket_port);
        let listener = TcpListener::bind(&address).map_err(|source| HubError::Bind {
            address: address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, fields = schema.fields().len(), "socket reader listening");
        ctx.messages
            .message(format!("Waiting for connection on port {}...", local_addr.port()));
        Ok(Self {
            ctx: Arc::clone(ctx),
            listener: Some(listener),
            local_addr,
            schema,
            client: None,
            partial: Vec::new(),
        })
    }

    /// Bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn accept(&mut self, control: &WorkerControl) -> HubResult<ReadStep> {
        let Some(listener) = &self.listener else {
            return Ok(ReadStep::Exhausted);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                self.client = Some(BufReader::new(stream));
                // Only one client is ever served.
                self.listener = None;
                self.ctx.messages.message(format!("Connected to {peer}"));
                Ok(ReadStep::Continue)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                control.nap(ACCEPT_POLL);
                Ok(ReadStep::Continue)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_line(&mut self, control: &WorkerControl) -> ReadStep {
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        if text.trim().is_empty() {
            return ReadStep::Continue;
        }
        match decode_line(&text, &self.schema, now_millis()) {
            Ok(events) => {
                for event in events {
                    let mut event = event;
                    loop {
                        match self.ctx.queue.offer(event, QUEUE_WAIT) {
                            Ok(()) => break,
                            Err(back) if control.is_active() => event = back,
                            Err(_) => return ReadStep::Exhausted,
                        }
                    }
                }
                ReadStep::Continue
            }
            Err(e) => self.protocol_error(e),
        }
    }

    fn protocol_error(&mut self, e: WireError) -> ReadStep {
        warn!(error = %e, "socket protocol error; closing connection");
        self.ctx.messages.message(format!("Error:\n{e}"));
        self.partial.clear();
        self.client = None;
        ReadStep::Exhausted
    }
}

impl SourceReader for SocketReader {
    fn kind(&self) -> Connection {
        Connection::SocketPort
    }

    fn step(&mut self, control: &WorkerControl) -> HubResult<ReadStep> {
        let Some(client) = self.client.as_mut() else {
            return self.accept(control);
        };
        let limit = (MAX_LINE + 1).saturating_sub(self.partial.len()) as u64;
        match client.by_ref().take(limit).read_until(b'\n', &mut self.partial) {
            Ok(0) => {
                if !self.partial.is_empty() {
                    self.handle_line(control);
                }
                self.ctx
                    .messages
                    .message("No more input from port. Closing connection.");
                self.client = None;
                Ok(ReadStep::Exhausted)
            }
            Ok(_) if self.partial.ends_with(b"\n") => Ok(self.handle_line(control)),
            Ok(_) if self.partial.len() > MAX_LINE => {
                Ok(self.protocol_error(WireError::LineTooLong { limit: MAX_LINE }))
            }
            // Data without terminator means the peer closed mid-line; the next read returns 0.
            Ok(_) => Ok(ReadStep::Continue),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadStep::Continue)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) {
        self.client = None;
        self.listener = None;
        debug!("socket reader closed");
    }
}
