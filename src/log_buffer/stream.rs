//! Line access to a plain or gzip-compressed log file.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

enum Source {
    Plain(BufReader<File>),
    Gzip(BufReader<MultiGzDecoder<File>>),
}

impl Source {
    fn reader(&mut self) -> &mut dyn BufRead {
        match self {
            Source::Plain(r) => r,
            Source::Gzip(r) => r,
        }
    }
}

/// One line read from the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line text without the terminator.
    pub text: String,
    /// Bytes consumed, including the terminator.
    pub len: usize,
    /// Whether the line is one of the leading header lines.
    pub header: bool,
}

/// Sequential reader over a log file with rewind and byte skipping.
///
/// Compression is detected from the first two bytes, not the file name.
pub struct LogStream {
    path: PathBuf,
    source: Source,
    gzip: bool,
    header_lines: usize,
    header_remaining: usize,
    position: u64,
    bytes_read: u64,
    opens: u64,
    buf: Vec<u8>,
}

fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(filled == magic.len() && magic == GZIP_MAGIC)
}

impl LogStream {
    /// Open `path`; the first `header_lines` non-empty lines are flagged as header.
    pub fn open(path: &Path, header_lines: usize) -> io::Result<Self> {
        let (source, gzip) = Self::open_source(path)?;
        tracing::debug!(path = %path.display(), gzip, "opened log stream");
        Ok(Self {
            path: path.to_path_buf(),
            source,
            gzip,
            header_lines,
            header_remaining: header_lines,
            position: 0,
            bytes_read: 0,
            opens: 1,
            buf: Vec::with_capacity(256),
        })
    }

    fn open_source(path: &Path) -> io::Result<(Source, bool)> {
        let mut file = File::open(path)?;
        if is_gzip(&mut file)? {
            Ok((Source::Gzip(BufReader::new(MultiGzDecoder::new(file))), true))
        } else {
            Ok((Source::Plain(BufReader::new(file)), false))
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is gzip-compressed.
    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    /// Offset in the (decompressed) stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total bytes read or skipped since opening, across rewinds.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// How many times the file was opened.
    pub fn opens(&self) -> u64 {
        self.opens
    }

    /// Read the next line; `None` at end of file.
    pub fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        self.buf.clear();
        let len = self.source.reader().read_until(b'\n', &mut self.buf)?;
        if len == 0 {
            return Ok(None);
        }
        self.position += len as u64;
        self.bytes_read += len as u64;
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        let header = if self.header_remaining > 0 && !text.trim().is_empty() {
            self.header_remaining -= 1;
            true
        } else {
            false
        };
        Ok(Some(RawLine { text, len, header }))
    }

    /// Skip `n` bytes forward; returns the bytes actually skipped.
    ///
    /// Skipping past the end leaves the stream at end of file.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let skipped = match &mut self.source {
            Source::Plain(reader) => {
                let len = reader.get_ref().metadata()?.len();
                let n = n.min(len.saturating_sub(self.position));
                let offset = i64::try_from(n)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "skip too large"))?;
                reader.seek_relative(offset)?;
                n
            }
            Source::Gzip(reader) => io::copy(&mut reader.by_ref().take(n), &mut io::sink())?,
        };
        self.position += skipped;
        self.bytes_read += skipped;
        self.header_remaining = 0;
        Ok(skipped)
    }

    /// Move to offset `pos` of the (decompressed) stream.
    ///
    /// Plain files seek directly; compressed files are reopened and skipped.
    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        if pos == 0 {
            return self.rewind();
        }
        match &mut self.source {
            Source::Plain(reader) => {
                reader.seek(SeekFrom::Start(pos))?;
                self.position = pos;
                self.header_remaining = 0;
            }
            Source::Gzip(_) => {
                self.rewind()?;
                self.skip(pos)?;
            }
        }
        Ok(())
    }

    /// Reopen the file and start over from the first byte.
    pub fn rewind(&mut self) -> io::Result<()> {
        let (source, gzip) = Self::open_source(&self.path)?;
        self.source = source;
        self.gzip = gzip;
        self.position = 0;
        self.header_remaining = self.header_lines;
        self.opens += 1;
        tracing::debug!(path = %self.path.display(), "rewound log stream");
        Ok(())
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("path", &self.path)
            .field("gzip", &self.gzip)
            .field("position", &self.position)
            .finish()
    }
}
