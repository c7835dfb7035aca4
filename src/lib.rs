//! # Replay Hub
//!
//! A hub that moves timestamped sensor events from one connection to another:
//! it records a live network bus to a (gzip-compressed) log file, replays such
//! a log onto the bus with the original timing, and ingests a checksummed
//! line protocol over TCP.
//!
//! ## Data flow
//!
//! ```text
//! SourceReader ──> DelayQueue ──> SinkWriter
//!   (disk / bus / socket)   (release at t + delay)   (disk / bus)
//! ```
//!
//! Every event is released at its recorded timestamp plus the replay delay
//! held by [`clock::ReplayClock`]. Pausing and seeking only move that delay;
//! seeking additionally repositions the [`log_buffer`] that streams the log
//! file.
//!
//! ## Crate Structure
//!
//! - **`hub`**: The [`hub::Hub`] controller that starts and supervises all parts.
//! - **`config`**: Layered configuration (defaults, TOML, environment, CLI).
//! - **`context`**: The [`context::HubContext`] shared by all components.
//! - **`event`**, **`parser`**, **`schema`**: The event model, the log line
//!   format and the XML slot schema.
//! - **`queue`**: The timed [`queue::DelayQueue`].
//! - **`log_buffer`**: Windowed, seekable streaming over log files.
//! - **`reader`**, **`writer`**: Source and sink variants.
//! - **`bus`**, **`wire`**: Network bus transport and the socket line protocol.
//! - **`control`**: Console and RPC control surfaces.
//! - **`messages`**, **`logging`**: Operator messages and tracing setup.
//! - **`worker`**, **`priority`**: Thread-per-role workers and scheduling priority.
//! - **`error`**, **`validation`**: Error type and configuration checks.

pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod event;
pub mod hub;
pub mod log_buffer;
pub mod logging;
pub mod messages;
pub mod parser;
pub mod priority;
pub mod queue;
pub mod reader;
pub mod schema;
pub mod validation;
pub mod wire;
pub mod worker;
pub mod writer;

pub use context::HubContext;
pub use error::{HubError, HubResult};
pub use event::{Event, Timestamp, Value};
pub use hub::Hub;
