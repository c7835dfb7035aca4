//! Recording events to a (by default gzip-compressed) log file.

use super::SinkWriter;
use crate::clock::now_millis;
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::HubResult;
use crate::event::{Event, Timestamp};
use crate::messages::Messenger;
use crate::parser::LineParser;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const HEADER_COMMENT: &str = "<!-- recorded by replay-hub -->";

enum Output {
    Raw(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Output::Raw(w) => w,
            Output::Gzip(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Output::Raw(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// First free name derived from `path`.
///
/// `path` itself when it does not exist, otherwise `prefix_NNN.suffix` with
/// the file name split at its first `.` and NNN counting up from 001.
pub fn unused_log_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (prefix, suffix) = match name.find('.') {
        Some(idx) => name.split_at(idx),
        None => (name.as_str(), ""),
    };
    let mut counter = 1u32;
    loop {
        let candidate = path.with_file_name(format!("{prefix}_{counter:03}{suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Writes one formatted line per event between a header and the root tags.
pub struct DiskWriter {
    requested: PathBuf,
    path: Option<PathBuf>,
    out: Option<Output>,
    raw: bool,
    header_line: String,
    header_lines: usize,
    root_tag: String,
    parser: Arc<dyn LineParser>,
    messages: Arc<Messenger>,
}

impl DiskWriter {
    /// Writer for the configured output file.
    pub fn new(ctx: &HubContext) -> Self {
        Self {
            requested: ctx.config.file.clone(),
            path: None,
            out: None,
            raw: ctx.config.write_raw,
            header_line: ctx.config.header_line.clone(),
            header_lines: ctx.config.header_lines,
            root_tag: ctx.config.root_tag.clone(),
            parser: Arc::clone(&ctx.parser),
            messages: Arc::clone(&ctx.messages),
        }
    }

    /// File actually written, once initialized.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn output(&mut self) -> io::Result<&mut dyn Write> {
        match self.out.as_mut() {
            Some(out) => Ok(out.writer()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "log file is not open")),
        }
    }
}

impl std::fmt::Debug for DiskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriter")
            .field("path", &self.path)
            .field("raw", &self.raw)
            .finish()
    }
}

impl SinkWriter for DiskWriter {
    fn kind(&self) -> Connection {
        Connection::Disk
    }

    fn initialize(&mut self) -> HubResult<()> {
        let path = unused_log_path(&self.requested);
        if path != self.requested {
            self.messages.message(format!(
                "{} already exists.\nChanging log file name to {}",
                self.requested.display(),
                path.display()
            ));
        }
        self.messages.message(format!("Logging to: {}", path.display()));

        let file = BufWriter::new(File::create(&path)?);
        self.out = Some(if self.raw {
            Output::Raw(file)
        } else {
            Output::Gzip(GzEncoder::new(file, Compression::default()))
        });
        let header_lines = self.header_lines;
        let header_line = self.header_line.clone();
        let root = format!("<{}>", self.root_tag);
        let out = self.output()?;
        for n in 0..header_lines {
            let line = if n == 0 { header_line.as_str() } else { HEADER_COMMENT };
            writeln!(out, "{line}")?;
        }
        writeln!(out, "{root}")?;
        info!(path = %path.display(), gzip = !self.raw, "recording to disk");
        self.path = Some(path);
        Ok(())
    }

    fn write(&mut self, event: &Event) -> HubResult<Option<Timestamp>> {
        let line = self.parser.format(event);
        writeln!(self.output()?, "{line}")?;
        Ok(Some(now_millis()))
    }

    fn close(&mut self) -> HubResult<()> {
        let close_tag = format!("</{}>", self.root_tag);
        if let Some(mut out) = self.out.take() {
            writeln!(out.writer(), "{close_tag}")?;
            out.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::event::Value;
    use crate::parser::XioParser;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn writer(path: &Path, raw: bool) -> DiskWriter {
        let ctx = HubContext::new(HubConfig {
            file: path.to_path_buf(),
            write_raw: raw,
            silent: true,
            ..HubConfig::default()
        });
        DiskWriter::new(&ctx)
    }

    #[test]
    fn free_name_counts_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.xio.gz");
        assert_eq!(unused_log_path(&path), path);
        std::fs::write(&path, b"x").unwrap();
        assert_eq!(unused_log_path(&path), dir.path().join("log_001.xio.gz"));
        std::fs::write(dir.path().join("log_001.xio.gz"), b"x").unwrap();
        assert_eq!(unused_log_path(&path), dir.path().join("log_002.xio.gz"));

        let bare = dir.path().join("capture");
        std::fs::write(&bare, b"x").unwrap();
        assert_eq!(unused_log_path(&bare), dir.path().join("capture_001"));
    }

    #[test]
    fn raw_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xio");
        let mut w = writer(&path, true);
        w.initialize().unwrap();
        let event = Event::new(Value::Int(4), "a", "b", 17);
        assert!(w.write(&event).unwrap().is_some());
        w.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"<?xml version="1.0"?>"#);
        assert_eq!(lines[1], HEADER_COMMENT);
        assert_eq!(lines[2], "<replay>");
        assert_eq!(XioParser::new().parse(lines[3]).unwrap(), event);
        assert_eq!(lines[4], "</replay>");
    }

    #[test]
    fn gzip_by_default_and_existing_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.xio.gz");
        std::fs::write(&path, b"old").unwrap();
        let mut w = writer(&path, false);
        w.initialize().unwrap();
        w.write(&Event::new(Value::Bool(true), "", "b", 1)).unwrap();
        w.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        let written = w.path().unwrap().to_path_buf();
        assert_eq!(written, dir.path().join("log_001.xio.gz"));
        let mut text = String::new();
        MultiGzDecoder::new(File::open(&written).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("<replay>"));
        assert!(text.trim_end().ends_with("</replay>"));
    }

    #[test]
    fn write_before_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(&dir.path().join("never"), true);
        assert!(w.write(&Event::new(Value::Int(1), "", "x", 0)).is_err());
    }
}
