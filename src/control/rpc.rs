//! Remote control over TCP.
//!
//! Requests and replies are JSON objects, one per line:
//!
//! ```text
//! -> {"method":"seek","params":60000}
//! <- {"ok":true}
//! -> {"method":"rewind"}
//! <- {"ok":false,"error":"unknown variant `rewind`, ..."}
//! ```
//!
//! The server runs a single-threaded tokio runtime on its own worker thread
//! and hands every request to the hub as a [`HubCommand`].

use super::{CommandSender, HubCommand};
use crate::context::HubContext;
use crate::error::{HubError, HubResult};
use crate::worker::{WorkerControl, WorkerThread};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const STOP_POLL: Duration = Duration::from_millis(100);
const HUB_ANSWER_TIMEOUT: Duration = Duration::from_secs(5);

/// A remote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    /// Resume the replay.
    Play,
    /// Pause the replay.
    Pause,
    /// Switch between pause and play.
    PlayPause,
    /// Seek to a position in ms relative to the first line.
    Seek(i64),
    /// Shut the hub down.
    Quit,
}

impl From<RpcRequest> for HubCommand {
    fn from(request: RpcRequest) -> Self {
        match request {
            RpcRequest::Play => HubCommand::SetPaused(false),
            RpcRequest::Pause => HubCommand::SetPaused(true),
            RpcRequest::PlayPause => HubCommand::TogglePause,
            RpcRequest::Seek(position) => HubCommand::Seek(position),
            RpcRequest::Quit => HubCommand::Quit,
        }
    }
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Whether the request was carried out.
    pub ok: bool,
    /// What went wrong otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn success() -> Self {
        Self { ok: true, error: None }
    }

    fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// The RPC server thread.
#[derive(Debug)]
pub struct RpcControl {
    worker: WorkerThread,
    local_addr: SocketAddr,
}

impl RpcControl {
    /// Bind `rpc_server_address:rpc_server_port` and start serving.
    ///
    /// Binding happens before this returns, so a taken port is a startup
    /// error.
    pub fn spawn(ctx: &Arc<HubContext>, commands: CommandSender) -> HubResult<Self> {
        let address = format!("{}:{}", ctx.config.rpc_server_address, ctx.config.rpc_server_port);
        let listener = std::net::TcpListener::bind(&address).map_err(|source| HubError::Bind {
            address: address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "RPC control listening");

        let worker = WorkerThread::spawn(WorkerControl::new("rpc"), false, move |control| {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "cannot start RPC runtime");
                    return;
                }
            };
            control.mark_initialized();
            runtime.block_on(serve(listener, control, commands));
            debug!("RPC control finished");
        })
        .map_err(|e| HubError::Startup("rpc".into(), e.to_string()))?;

        Ok(Self { worker, local_addr })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to stop.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        self.worker.control().name()
    }

    /// Whether the server thread exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Join the thread once it exited.
    pub fn join_if_finished(&self) -> bool {
        self.worker.join_if_finished()
    }
}

async fn serve(listener: std::net::TcpListener, control: Arc<WorkerControl>, commands: CommandSender) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "cannot register RPC listener");
            return;
        }
    };
    while control.is_active() {
        tokio::select! {
            _ = tokio::time::sleep(STOP_POLL) => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "RPC client connected");
                    let control = Arc::clone(&control);
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, &control, &commands).await {
                            debug!(%peer, error = %e, "RPC connection error");
                        }
                        debug!(%peer, "RPC client disconnected");
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    control: &WorkerControl,
    commands: &CommandSender,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while control.is_active() {
        let line = tokio::select! {
            _ = tokio::time::sleep(STOP_POLL) => continue,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = answer(&line, commands).await;
        let mut encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        encoded.push('\n');
        write_half.write_all(encoded.as_bytes()).await?;
    }
    Ok(())
}

async fn answer(line: &str, commands: &CommandSender) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return RpcResponse::failure(e),
    };
    debug!(?request, "RPC request");
    let commands = commands.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        commands.request(HubCommand::from(request), HUB_ANSWER_TIMEOUT)
    })
    .await;
    match outcome {
        Ok(Ok(())) => RpcResponse::success(),
        Ok(Err(e)) => RpcResponse::failure(e),
        Err(e) => RpcResponse::failure(e),
    }
}
