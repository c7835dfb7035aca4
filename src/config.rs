//! Hub configuration using Figment.
//!
//! Configuration is layered, later layers winning:
//! 1. built-in defaults
//! 2. an optional TOML file (`--config hub.toml`)
//! 3. environment variables prefixed with `REPLAY_HUB_`
//! 4. options given on the command line
//!
//! # Example
//! ```no_run
//! use replay_hub::config::{ConfigOverrides, HubConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::load(None, &ConfigOverrides::default())?;
//! println!("replaying {} to {}", config.input, config.output);
//! # Ok(())
//! # }
//! ```

use crate::error::{HubError, HubResult};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where events come from or go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    /// Live publish/subscribe network bus.
    #[serde(alias = "networkbus", alias = "network")]
    NetworkBus,
    /// Log file on disk.
    #[serde(alias = "disk")]
    Disk,
    /// Alternative bus middleware, served by the same bus transport.
    #[serde(alias = "rsbus", alias = "rsb")]
    RSBus,
    /// Inbound TCP records (source only).
    #[serde(alias = "socketport", alias = "socket")]
    SocketPort,
}

impl Connection {
    /// Whether this connection goes through a [`Bus`](crate::bus::Bus).
    pub fn is_bus(self) -> bool {
        matches!(self, Connection::NetworkBus | Connection::RSBus)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Connection::NetworkBus => "NetworkBus",
            Connection::Disk => "Disk",
            Connection::RSBus => "RSBus",
            Connection::SocketPort => "SocketPort",
        };
        f.write_str(name)
    }
}

impl FromStr for Connection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "networkbus" | "network" => Ok(Connection::NetworkBus),
            "disk" => Ok(Connection::Disk),
            "rsbus" | "rsb" => Ok(Connection::RSBus),
            "socketport" | "socket" => Ok(Connection::SocketPort),
            _ => Err(format!(
                "unknown connection '{s}'; expected one of NetworkBus, Disk, RSBus, SocketPort"
            )),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Source of events.
    pub input: Connection,
    /// Target of events.
    pub output: Connection,
    /// Log file read or written by the disk variants.
    pub file: PathBuf,
    /// Write uncompressed output.
    pub write_raw: bool,
    /// Predefined slots for the bus variants.
    pub slot_file: Option<PathBuf>,
    /// Field layout for the socket source.
    pub socket_schema_file: Option<PathBuf>,
    /// Port the socket source listens on.
    pub socket_port: u16,
    /// Number of non-event lines at the top of a log file.
    pub header_lines: usize,
    /// First header line written to new log files.
    pub header_line: String,
    /// Root element wrapping the events of a written log.
    pub root_tag: String,

    /// Maximum number of events waiting in the delay queue.
    pub queue_capacity: usize,
    /// Maximum number of events in the in-memory log window.
    pub buffer_capacity: usize,
    /// Lookback kept when the log window shifts.
    pub buffer_threshold: usize,
    /// Smallest byte skip worth doing during a fast seek.
    pub buffer_minimum_skip: u64,
    /// Lines sampled to estimate the log's byte rate.
    pub num_lines_to_est_bps: usize,
    /// Lower clamp for fast-seek progress.
    pub to_small_progress: f64,
    /// Progress at which the byte-rate estimate is trusted.
    pub big_enough_progress: f64,
    /// Fast-seek iterations before falling back to a linear scan.
    pub max_fast_seek_iterations: u32,

    /// Initial replay offset in milliseconds.
    pub offset: i64,
    /// Quit after this many milliseconds without output; 0 disables.
    pub quit_if_idle: u64,

    /// Keep a history of lag measurements.
    pub lag_history: bool,
    /// Measure lag on every Nth written event.
    pub lag_log_n: u64,
    /// Where `savelag` writes the history.
    pub lag_log_file: PathBuf,

    /// Host the RPC control listens on.
    pub rpc_server_address: String,
    /// Port the RPC control listens on.
    pub rpc_server_port: u16,
    /// Disable the RPC control.
    pub no_rpc: bool,
    /// Read commands from stdin.
    pub console: bool,

    /// Multicast group of the network bus.
    pub multicast_address: String,
    /// Port of the network bus.
    pub multicast_port: u16,
    /// Multicast TTL.
    pub multicast_ttl: u32,
    /// Send to this host instead of the multicast group.
    pub unicast_address: Option<String>,
    /// Namespace prefix announced by the hub on the bus.
    pub namespace_label: String,
    /// Publish an initial value for every predefined slot.
    pub send_init_value: bool,

    /// Raise scheduling priority of reader and writer threads.
    pub maxprio: bool,
    /// Suppress status messages.
    pub silent: bool,
    /// Log level for the tracing subscriber.
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            input: Connection::Disk,
            output: Connection::NetworkBus,
            file: PathBuf::from("log.xio.gz"),
            write_raw: false,
            slot_file: None,
            socket_schema_file: None,
            socket_port: 4242,
            header_lines: 2,
            header_line: r#"<?xml version="1.0"?>"#.to_string(),
            root_tag: "replay".to_string(),
            queue_capacity: 10_000,
            buffer_capacity: 1_000_000,
            buffer_threshold: 100_000,
            buffer_minimum_skip: 2_000,
            num_lines_to_est_bps: 10_000,
            to_small_progress: 0.01,
            big_enough_progress: 0.99,
            max_fast_seek_iterations: 32,
            offset: 0,
            quit_if_idle: 0,
            lag_history: false,
            lag_log_n: 100,
            lag_log_file: PathBuf::from("lag.dat"),
            rpc_server_address: "localhost".to_string(),
            rpc_server_port: 4243,
            no_rpc: false,
            console: true,
            multicast_address: "224.21.12.68".to_string(),
            multicast_port: 4711,
            multicast_ttl: 1,
            unicast_address: None,
            namespace_label: "replay-hub".to_string(),
            send_init_value: false,
            maxprio: false,
            silent: false,
            log_level: "info".to_string(),
        }
    }
}

/// Options given on the command line.
///
/// Every field is optional; only the ones actually given override the
/// lower configuration layers.
#[derive(Debug, Clone, Default, Serialize, clap::Args)]
pub struct ConfigOverrides {
    /// Source: NetworkBus, Disk, RSBus or SocketPort
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Connection>,
    /// Target: NetworkBus, Disk or RSBus
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Connection>,
    /// Log file to read or write
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Write the log uncompressed
    #[arg(long, alias = "writeRaw")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub write_raw: bool,
    /// XML file with predefined slots
    #[arg(short, long = "slotfile", alias = "slot-file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_file: Option<PathBuf>,
    /// XML file describing socket record fields
    #[arg(long, alias = "vpfile")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_schema_file: Option<PathBuf>,
    /// Port for socket input
    #[arg(long, alias = "vpport")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_port: Option<u16>,
    /// Number of header lines in log files
    #[arg(long, alias = "headerlines")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_lines: Option<usize>,
    /// Delay queue capacity
    #[arg(long, alias = "queueCapacity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    /// Log window capacity
    #[arg(long, alias = "bufferCapacity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<usize>,
    /// Log window lookback kept when shifting
    #[arg(long, alias = "bufferThreshold")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_threshold: Option<usize>,
    /// Minimum byte skip during fast seeks
    #[arg(long, alias = "bufferMinimumSkip")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_minimum_skip: Option<u64>,
    /// Lines sampled to estimate the byte rate
    #[arg(long, alias = "numLinesToEstBPS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_lines_to_est_bps: Option<usize>,
    /// Lower clamp for fast-seek progress
    #[arg(long, alias = "toSmallProgress")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_small_progress: Option<f64>,
    /// Progress at which the byte-rate estimate is trusted
    #[arg(long, alias = "bigEnoughProgress")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub big_enough_progress: Option<f64>,
    /// Initial replay offset in ms
    #[arg(long, allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Quit after this many ms without output (0 = never)
    #[arg(long, alias = "quitIfIdle")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quit_if_idle: Option<u64>,
    /// Keep a lag history
    #[arg(long, alias = "lagHistory")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub lag_history: bool,
    /// Measure lag every N events
    #[arg(long, alias = "lagLogN")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag_log_n: Option<u64>,
    /// File for `savelag`
    #[arg(long, alias = "lagLogFile")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag_log_file: Option<PathBuf>,
    /// RPC control host
    #[arg(long, alias = "rpcServerAddress")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_server_address: Option<String>,
    /// RPC control port
    #[arg(long, alias = "rpcServerPort")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_server_port: Option<u16>,
    /// Disable the RPC control
    #[arg(long, alias = "noRPC")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_rpc: bool,
    /// Multicast group
    #[arg(long, alias = "mcaddress")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_address: Option<String>,
    /// Multicast port
    #[arg(long, alias = "mcport")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_port: Option<u16>,
    /// Multicast TTL
    #[arg(long, alias = "mcttl")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_ttl: Option<u32>,
    /// Unicast target instead of the multicast group
    #[arg(long, alias = "ucaddress")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unicast_address: Option<String>,
    /// Publish initial values for predefined slots
    #[arg(long, alias = "sendInitValue")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub send_init_value: bool,
    /// Raise reader/writer thread priority
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub maxprio: bool,
    /// Suppress status messages
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub silent: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn config_error(field: &str, reason: impl fmt::Display) -> HubError {
    HubError::Configuration(format!("{field}: {reason}"))
}

impl HubConfig {
    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "REPLAY_HUB_";

    /// Defaults, optional TOML file and environment, without CLI overrides.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(HubConfig::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(Self::ENV_PREFIX))
    }

    /// Load all layers and validate the result.
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> HubResult<Self> {
        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(config_error(
                    "config",
                    format!("{} does not exist", path.display()),
                ));
            }
        }
        let config: HubConfig = Self::figment(config_file)
            .merge(Serialized::defaults(overrides))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> HubResult<()> {
        if self.input == self.output {
            return Err(config_error(
                "input/output",
                format!("source and target are both {}", self.input),
            ));
        }
        if self.output == Connection::SocketPort {
            return Err(config_error("output", "SocketPort can only be used as input"));
        }
        if self.input == Connection::Disk && !self.file.is_file() {
            return Err(config_error(
                "file",
                format!("{} does not exist", self.file.display()),
            ));
        }
        if self.output == Connection::Disk {
            let path = self.file.to_string_lossy();
            validation::is_valid_path(&path).map_err(|e| config_error("file", e))?;
        }
        // Listening ports may be 0, which lets the OS pick one.
        if self.input == Connection::SocketPort && self.socket_schema_file.is_none() {
            return Err(config_error(
                "socket_schema_file",
                "socket input needs a field schema",
            ));
        }
        if self.input == Connection::Disk && !self.no_rpc {
            validation::is_valid_host(&self.rpc_server_address)
                .map_err(|e| config_error("rpc_server_address", e))?;
        }
        if self.input.is_bus() || self.output.is_bus() {
            validation::is_valid_port(self.multicast_port)
                .map_err(|e| config_error("multicast_port", e))?;
            match &self.unicast_address {
                Some(host) => {
                    validation::is_valid_host(host).map_err(|e| config_error("unicast_address", e))?
                }
                None => validation::is_multicast_group(&self.multicast_address)
                    .map_err(|e| config_error("multicast_address", e))?,
            }
        }
        if self.queue_capacity == 0 {
            return Err(config_error("queue_capacity", "must be greater than 0"));
        }
        if self.buffer_capacity == 0 {
            return Err(config_error("buffer_capacity", "must be greater than 0"));
        }
        if self.buffer_threshold > self.buffer_capacity {
            return Err(config_error(
                "buffer_threshold",
                "must not exceed buffer_capacity",
            ));
        }
        if self.num_lines_to_est_bps == 0 {
            return Err(config_error("num_lines_to_est_bps", "must be greater than 0"));
        }
        if self.lag_log_n == 0 {
            return Err(config_error("lag_log_n", "must be greater than 0"));
        }
        if self.max_fast_seek_iterations == 0 {
            return Err(config_error(
                "max_fast_seek_iterations",
                "must be greater than 0",
            ));
        }
        validation::is_in_range(self.to_small_progress, f64::MIN_POSITIVE..=1.0)
            .map_err(|e| config_error("to_small_progress", e))?;
        validation::is_in_range(self.big_enough_progress, self.to_small_progress..=1.0)
            .map_err(|e| config_error("big_enough_progress", e))?;
        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(config_error(
                "log_level",
                format!("must be one of: {}", levels.join(", ")),
            ));
        }
        Ok(())
    }

    /// Whether pause, seek and the other replay commands are meaningful.
    pub fn is_seekable(&self) -> bool {
        self.input == Connection::Disk
    }

    /// Configuration rendered as TOML for the `config` command.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn disk_config(file: &Path) -> HubConfig {
        HubConfig {
            file: file.to_path_buf(),
            ..HubConfig::default()
        }
    }

    #[test]
    fn default_disk_to_bus_config_validates() {
        let log = tempfile::NamedTempFile::new().unwrap();
        assert!(disk_config(log.path()).validate().is_ok());
    }

    #[test]
    fn same_source_and_target_is_rejected() {
        let log = tempfile::NamedTempFile::new().unwrap();
        let config = HubConfig {
            output: Connection::Disk,
            ..disk_config(log.path())
        };
        assert!(matches!(config.validate(), Err(HubError::Configuration(_))));
    }

    #[test]
    fn socket_port_cannot_be_a_target() {
        let config = HubConfig {
            input: Connection::NetworkBus,
            output: Connection::SocketPort,
            ..HubConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SocketPort"));
    }

    #[test]
    fn missing_disk_source_is_rejected() {
        let config = disk_config(Path::new("/no/such/log.xio.gz"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_larger_than_capacity_is_rejected() {
        let log = tempfile::NamedTempFile::new().unwrap();
        let config = HubConfig {
            buffer_capacity: 10,
            buffer_threshold: 20,
            ..disk_config(log.path())
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn progress_thresholds_must_be_ordered() {
        let log = tempfile::NamedTempFile::new().unwrap();
        let config = HubConfig {
            to_small_progress: 0.5,
            big_enough_progress: 0.2,
            ..disk_config(log.path())
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn connection_names_parse_case_insensitively() {
        assert_eq!("disk".parse::<Connection>(), Ok(Connection::Disk));
        assert_eq!("NetworkBus".parse::<Connection>(), Ok(Connection::NetworkBus));
        assert_eq!("RSBus".parse::<Connection>(), Ok(Connection::RSBus));
        assert_eq!("socketport".parse::<Connection>(), Ok(Connection::SocketPort));
        assert!("carrier-pigeon".parse::<Connection>().is_err());
    }

    #[test]
    fn toml_file_and_overrides_are_layered() {
        let log = tempfile::NamedTempFile::new().unwrap();
        let mut toml_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            toml_file,
            "file = {:?}\nqueue_capacity = 500\noutput = \"Disk\"\ninput = \"NetworkBus\"",
            log.path().display().to_string()
        )
        .unwrap();

        let overrides = ConfigOverrides {
            queue_capacity: Some(42),
            ..ConfigOverrides::default()
        };
        let config = HubConfig::load(Some(toml_file.path()), &overrides).unwrap();
        assert_eq!(config.queue_capacity, 42);
        assert_eq!(config.output, Connection::Disk);
        assert_eq!(config.input, Connection::NetworkBus);
        assert_eq!(config.buffer_capacity, 1_000_000);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let result = HubConfig::load(
            Some(Path::new("/no/such/hub.toml")),
            &ConfigOverrides::default(),
        );
        assert!(matches!(result, Err(HubError::Configuration(_))));
    }

    #[test]
    fn renders_as_toml() {
        let text = HubConfig::default().to_toml();
        assert!(text.contains("queue_capacity = 10000"));
        assert!(text.contains("input = \"Disk\""));
    }
}
