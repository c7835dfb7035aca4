//! Line-based command console on stdin.

use super::{CommandSender, HubCommand};
use crate::context::HubContext;
use crate::error::{HubError, HubResult};
use crate::worker::{WorkerControl, WorkerThread};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Command overview printed by `h`.
pub const HELP: &str = "\
Use following commands (and press 'Enter'):
 Commands for all modes:
  h                   : show help
  q                   : quit
  msg                 : turn status messages on/off
  queue               : show the delay queue
  config              : show the configuration
 Commands for replaying from disk:
  p                   : (un)pause
  seek <ms>           : jump to a position relative to the first line
  skip <n> [ms|s|m|h] : jump forward or backward by an amount of time
  time                : show the replay position in h, m, s
  reset               : restart the replay
  offset [<ms>]       : show [or set] the replay offset
  buffer              : show the log window
  savelag             : save the lag history
  0 | 1 | last        : show last written, first line or last line timestamp";

fn number(token: Option<&str>, missing: &str, malformed: &str) -> Result<i64, String> {
    let token = token.ok_or_else(|| missing.to_string())?;
    token.parse::<i64>().map_err(|_| malformed.to_string())
}

/// Parse one console line into a command.
///
/// The error is the text to show the operator.
pub fn parse_command(line: &str) -> Result<HubCommand, String> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Err("empty command".into());
    };
    let command = match head {
        "q" | "quit" => HubCommand::Quit,
        "h" | "help" => HubCommand::Help,
        "p" => HubCommand::TogglePause,
        "msg" => HubCommand::ToggleMessages,
        "queue" => HubCommand::ShowQueue,
        "config" => HubCommand::ShowConfig,
        "time" => HubCommand::ShowTime,
        "reset" => HubCommand::Reset,
        "buffer" => HubCommand::ShowBuffer,
        "savelag" => HubCommand::SaveLag,
        "0" => HubCommand::ShowLastWritten,
        "1" => HubCommand::ShowFirstLine,
        "last" => HubCommand::ShowLastLine,
        "offset" => match tokens.next() {
            None => HubCommand::Offset(None),
            Some(value) => HubCommand::Offset(Some(
                value
                    .parse()
                    .map_err(|_| "Wrong number format for this command.".to_string())?,
            )),
        },
        "seek" => HubCommand::Seek(number(
            tokens.next(),
            "A timestamp is needed for the seek command. Usage: seek <timestamp>",
            "Wrong number format for seek command.",
        )?),
        "skip" => {
            let amount = number(
                tokens.next(),
                "A milliseconds value is needed for the skip command.\n Usage: skip <milliseconds> (<unit>)",
                "Wrong number format for skip command.",
            )?;
            let factor = match tokens.next() {
                None | Some("ms") => 1,
                Some("s") => 1_000,
                Some("m") => 60_000,
                Some("h") => 3_600_000,
                Some(_) => {
                    return Err("Don't know this time unit. Use ms, s, m or h.\n \
                                Default is ms, if you omit the time unit."
                        .into())
                }
            };
            HubCommand::Skip(amount.saturating_mul(factor))
        }
        other => return Err(format!("unknown command '{other}', enter 'h' for help")),
    };
    Ok(command)
}

/// Reads commands from a line source on its own thread.
#[derive(Debug)]
pub struct ConsoleControl {
    worker: WorkerThread,
}

impl ConsoleControl {
    /// Read commands from stdin.
    pub fn spawn(ctx: &Arc<HubContext>, commands: CommandSender) -> HubResult<Self> {
        Self::with_input(std::io::BufReader::new(std::io::stdin()), ctx, commands)
    }

    /// Read commands from any line source.
    ///
    /// Input is pumped by a detached thread, since a blocking read cannot
    /// be interrupted; the console itself stays responsive to stop.
    pub fn with_input<R>(input: R, ctx: &Arc<HubContext>, commands: CommandSender) -> HubResult<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
        std::thread::Builder::new()
            .name("console-input".into())
            .spawn(move || {
                for line in input.lines() {
                    match line {
                        Ok(line) => {
                            if line_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "reading console input failed");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| HubError::Startup("console-input".into(), e.to_string()))?;

        let ctx = Arc::clone(ctx);
        let worker = WorkerThread::spawn(WorkerControl::new("console"), false, move |control| {
            control.mark_initialized();
            ctx.messages.message("please enter 'q' to exit ('h' for help)");
            console_loop(&control, &ctx, &commands, &line_rx);
            debug!("console finished");
        })
        .map_err(|e| HubError::Startup("console".into(), e.to_string()))?;
        Ok(Self { worker })
    }

    /// Ask the console to stop reading.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        self.worker.control().name()
    }

    /// Whether the console thread exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Join the thread once it exited.
    pub fn join_if_finished(&self) -> bool {
        self.worker.join_if_finished()
    }
}

fn console_loop(
    control: &WorkerControl,
    ctx: &HubContext,
    commands: &CommandSender,
    lines: &Receiver<String>,
) {
    while control.is_active() {
        let line = match lines.recv_timeout(INPUT_POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("console input closed");
                return;
            }
        };
        ctx.clock.touch();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(input = line, "console command");
        match parse_command(line) {
            Ok(command) => {
                if commands.send(command).is_err() {
                    return;
                }
            }
            Err(text) => ctx.messages.reply(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::control::command_channel;
    use std::io::Cursor;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("q"), Ok(HubCommand::Quit));
        assert_eq!(parse_command("  p "), Ok(HubCommand::TogglePause));
        assert_eq!(parse_command("0"), Ok(HubCommand::ShowLastWritten));
        assert_eq!(parse_command("1"), Ok(HubCommand::ShowFirstLine));
        assert_eq!(parse_command("last"), Ok(HubCommand::ShowLastLine));
        assert_eq!(parse_command("offset"), Ok(HubCommand::Offset(None)));
        assert_eq!(parse_command("offset -250"), Ok(HubCommand::Offset(Some(-250))));
    }

    #[test]
    fn seek_needs_a_number() {
        assert_eq!(parse_command("seek 1500"), Ok(HubCommand::Seek(1500)));
        assert_eq!(
            parse_command("seek abc"),
            Err("Wrong number format for seek command.".into())
        );
        assert!(parse_command("seek").unwrap_err().starts_with("A timestamp is needed"));
    }

    #[test]
    fn skip_units() {
        assert_eq!(parse_command("skip 250"), Ok(HubCommand::Skip(250)));
        assert_eq!(parse_command("skip 250 ms"), Ok(HubCommand::Skip(250)));
        assert_eq!(parse_command("skip 3 s"), Ok(HubCommand::Skip(3_000)));
        assert_eq!(parse_command("skip -2 m"), Ok(HubCommand::Skip(-120_000)));
        assert_eq!(parse_command("skip 1 h"), Ok(HubCommand::Skip(3_600_000)));
        assert!(parse_command("skip 1 d").unwrap_err().starts_with("Don't know this time unit"));
    }

    #[test]
    fn unknown_input_points_to_help() {
        let err = parse_command("jump 5").unwrap_err();
        assert!(err.contains("'h'"), "{err}");
    }

    #[test]
    fn forwards_commands_and_reports_mistakes() {
        let ctx = HubContext::new(HubConfig {
            silent: true,
            ..HubConfig::default()
        });
        let (sender, rx) = command_channel();
        let console =
            ConsoleControl::with_input(Cursor::new("\nseek 10\nbogus\nq\n"), &ctx, sender).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.command, HubCommand::Seek(10));
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second.command, HubCommand::Quit);
        assert!(ctx.messages.contains("unknown command 'bogus'"));
        assert!(ctx.clock.last_activity().is_some());

        for _ in 0..50 {
            if console.join_if_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(console.is_finished());
    }
}
