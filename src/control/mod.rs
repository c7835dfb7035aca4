//! Control surfaces and the commands they send to the hub.
//!
//! The console and the RPC server never touch readers or writers directly.
//! They translate their input into [`HubCommand`]s and push them through a
//! [`CommandSender`]; the hub executes commands one at a time on its own
//! thread.
//!
//! ```text
//! console thread ──┐
//!                  ├──> crossbeam channel ──> Hub::run ──> reader / writer / queue
//! rpc thread ──────┘
//! ```
//!
//! A command may carry a reply channel so the sender can wait for the
//! outcome (see [`CommandSender::request`]).

pub mod console;
pub mod rpc;

pub use console::{parse_command, ConsoleControl};
pub use rpc::{RpcControl, RpcRequest, RpcResponse};

use crate::error::{HubError, HubResult};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

/// Operations a control surface can ask the hub to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    /// Shut the hub down.
    Quit,
    /// Print the command overview.
    Help,
    /// Switch between pause and play.
    TogglePause,
    /// Pause (`true`) or play (`false`).
    SetPaused(bool),
    /// Seek to a position in ms relative to the (offset-shifted) first line.
    Seek(i64),
    /// Seek by a number of ms relative to the last written event.
    Skip(i64),
    /// Restart the replay from the first line.
    Reset,
    /// Print wall clock and replay position.
    ShowTime,
    /// Show (`None`) or set the replay offset.
    Offset(Option<i64>),
    /// Print the log window state.
    ShowBuffer,
    /// Toggle status message output.
    ToggleMessages,
    /// Print the delay queue state.
    ShowQueue,
    /// Print the active configuration.
    ShowConfig,
    /// Save the lag history.
    SaveLag,
    /// Print the timestamp of the last written event.
    ShowLastWritten,
    /// Print the timestamp of the first log line.
    ShowFirstLine,
    /// Print the timestamp of the last log line.
    ShowLastLine,
}

impl HubCommand {
    /// Whether the command only makes sense when replaying from disk.
    pub fn needs_disk_source(&self) -> bool {
        matches!(
            self,
            HubCommand::TogglePause
                | HubCommand::SetPaused(_)
                | HubCommand::Seek(_)
                | HubCommand::Skip(_)
                | HubCommand::Reset
                | HubCommand::ShowTime
                | HubCommand::Offset(_)
                | HubCommand::ShowBuffer
                | HubCommand::SaveLag
                | HubCommand::ShowFirstLine
                | HubCommand::ShowLastLine
        )
    }
}

/// A command in flight, with an optional channel for its outcome.
#[derive(Debug)]
pub struct ControlRequest {
    /// What to do.
    pub command: HubCommand,
    /// Where to report the outcome, if anyone is waiting.
    pub reply: Option<Sender<HubResult<()>>>,
}

impl ControlRequest {
    /// Report the outcome to the waiting sender, if any.
    pub fn respond(self, outcome: HubResult<()>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(outcome);
        }
    }
}

/// Cloneable handle used by control surfaces to reach the hub.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<ControlRequest>,
}

/// Create the hub command channel.
pub fn command_channel() -> (CommandSender, Receiver<ControlRequest>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CommandSender { tx }, rx)
}

impl CommandSender {
    /// Queue a command without waiting for it.
    pub fn send(&self, command: HubCommand) -> HubResult<()> {
        self.tx
            .send(ControlRequest {
                command,
                reply: None,
            })
            .map_err(|_| HubError::Unavailable("hub is no longer running".into()))
    }

    /// Queue a command and wait up to `timeout` for its outcome.
    pub fn request(&self, command: HubCommand, timeout: Duration) -> HubResult<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(ControlRequest {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| HubError::Unavailable("hub is no longer running".into()))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| HubError::Unavailable("no answer from hub".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_commands_need_disk() {
        assert!(HubCommand::Seek(0).needs_disk_source());
        assert!(HubCommand::TogglePause.needs_disk_source());
        assert!(!HubCommand::Quit.needs_disk_source());
        assert!(!HubCommand::ShowQueue.needs_disk_source());
        assert!(!HubCommand::ShowLastWritten.needs_disk_source());
    }

    #[test]
    fn request_waits_for_reply() {
        let (sender, rx) = command_channel();
        let hub = std::thread::spawn(move || {
            let req = rx.recv().unwrap();
            assert_eq!(req.command, HubCommand::Reset);
            req.respond(Err(HubError::Unavailable("reset".into())));
        });
        let outcome = sender.request(HubCommand::Reset, Duration::from_secs(2));
        assert!(matches!(outcome, Err(HubError::Unavailable(_))));
        hub.join().unwrap();
    }

    #[test]
    fn send_fails_once_hub_is_gone() {
        let (sender, rx) = command_channel();
        drop(rx);
        assert!(sender.send(HubCommand::Quit).is_err());
    }
}
