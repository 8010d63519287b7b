//! Single-file local log.
//!
//! File layout:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Header (32 bytes)                    │
//! │   Magic "PERCHLOG" (8)               │
//! │   Version (4)                        │
//! │   Creation time, seconds (8)         │
//! │   Reserved (12)                      │
//! ├──────────────────────────────────────┤
//! │ Entry: len (4) seq (8) crc32 (4)     │
//! │        payload (len)                 │
//! ├──────────────────────────────────────┤
//! │ ...                                  │
//! └──────────────────────────────────────┘
//! ```
//!
//! Truncation rewrites the retained suffix to a sibling file and renames it
//! over the log, so a crash mid-truncation leaves either the old or the new
//! file intact.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use perch_core::config::FileLogConfig;
use perch_core::digest::crc32_checksum;
use perch_core::error::{Error, Result};

use super::{Entry, Log, LogStream, Position};

const LOG_MAGIC: &[u8; 8] = b"PERCHLOG";
const LOG_VERSION: u32 = 1;
const LOG_HEADER_SIZE: u64 = 32;

/// A log stored in one local append-only file.
pub struct FileLog {
    config: FileLogConfig,
}

impl FileLog {
    pub fn new(config: FileLogConfig) -> Self {
        Self { config }
    }
}

impl Log for FileLog {
    fn open(&self) -> Result<Box<dyn LogStream>> {
        Ok(Box::new(FileStream::open(self.config.clone())?))
    }
}

struct LogWriter {
    file: BufWriter<File>,
    next_seq: u64,
}

struct FileStream {
    config: FileLogConfig,
    writer: Mutex<LogWriter>,
}

fn create_log_file(path: &Path, buffer_size: usize) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .read(true)
        .open(path)?;
    let mut writer = BufWriter::with_capacity(buffer_size, file);

    writer.write_all(LOG_MAGIC)?;
    writer.write_u32::<LittleEndian>(LOG_VERSION)?;
    writer.write_u64::<LittleEndian>(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )?;
    writer.write_all(&[0u8; 12])?; // Reserved
    writer.flush()?;
    Ok(writer)
}

fn validate_header(reader: &mut impl Read) -> Result<()> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != LOG_MAGIC {
        return Err(Error::Log {
            message: "invalid log file magic number".to_string(),
            source: None,
        });
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != LOG_VERSION {
        return Err(Error::Log {
            message: format!("unsupported log version: {}", version),
            source: None,
        });
    }
    let _creation_time = reader.read_u64::<LittleEndian>()?;
    reader.read_exact(&mut [0u8; 12])?;
    Ok(())
}

fn write_record(writer: &mut impl Write, seq: u64, payload: &[u8]) -> Result<()> {
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_u64::<LittleEndian>(seq)?;
    writer.write_u32::<LittleEndian>(crc32_checksum(payload))?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read one entry; `Ok(None)` at a clean end of file.
fn read_record(reader: &mut impl Read) -> Result<Option<(u64, Bytes)>> {
    let length = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let seq = reader.read_u64::<LittleEndian>()?;
    let crc = reader.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    if crc32_checksum(&payload) != crc {
        return Err(Error::Log {
            message: format!("CRC mismatch at sequence {}", seq),
            source: None,
        });
    }
    Ok(Some((seq, Bytes::from(payload))))
}

impl FileStream {
    fn open(config: FileLogConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let next_seq = if config.path.exists() {
            let mut next = 0;
            Self::scan(&config.path, |seq, _| {
                next = seq + 1;
                Ok(())
            })?;
            next
        } else {
            create_log_file(&config.path, config.buffer_size)?.flush()?;
            0
        };

        let mut file = OpenOptions::new().write(true).read(true).open(&config.path)?;
        file.seek(SeekFrom::End(0))?;
        let writer = BufWriter::with_capacity(config.buffer_size, file);

        info!(path = %config.path.display(), next_seq, "opened file log");
        Ok(Self {
            writer: Mutex::new(LogWriter { file: writer, next_seq }),
            config,
        })
    }

    fn scan(path: &Path, mut visit: impl FnMut(u64, Bytes) -> Result<()>) -> Result<()> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        validate_header(&mut reader)?;
        while let Some((seq, payload)) = read_record(&mut reader)? {
            visit(seq, payload)?;
        }
        Ok(())
    }

    fn flush_writer(&self, writer: &mut LogWriter, sync: bool) -> Result<()> {
        writer.file.flush()?;
        if sync {
            writer.file.get_ref().sync_all()?;
        }
        Ok(())
    }
}

impl LogStream for FileStream {
    fn read_all(&self) -> Result<Box<dyn Iterator<Item = Result<Entry>> + Send>> {
        {
            let mut writer = self.writer.lock();
            self.flush_writer(&mut writer, false)?;
        }

        let mut entries = Vec::new();
        Self::scan(&self.config.path, |_, payload| {
            entries.push(Entry(payload));
            Ok(())
        })?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn append(&self, contents: &[u8]) -> Result<Position> {
        let mut writer = self.writer.lock();
        let seq = writer.next_seq;
        write_record(&mut writer.file, seq, contents).map_err(|e| Error::Append {
            message: format!("append of sequence {} failed", seq),
            source: Some(Box::new(e)),
        })?;
        self.flush_writer(&mut writer, self.config.sync_on_write)
            .map_err(|e| Error::Append {
                message: format!("flush of sequence {} failed", seq),
                source: Some(Box::new(e)),
            })?;
        writer.next_seq = seq + 1;
        Ok(Position(seq))
    }

    fn truncate_before(&self, position: Position) -> Result<()> {
        let mut writer = self.writer.lock();
        self.flush_writer(&mut writer, true)?;

        let compact_path: PathBuf = self.config.path.with_extension("compact");
        let mut compact = create_log_file(&compact_path, self.config.buffer_size)?;
        let mut retained = 0u64;
        Self::scan(&self.config.path, |seq, payload| {
            if seq >= position.0 {
                write_record(&mut compact, seq, &payload)?;
                retained += 1;
            }
            Ok(())
        })?;
        compact.flush()?;
        compact.get_ref().sync_all()?;
        drop(compact);

        std::fs::rename(&compact_path, &self.config.path)?;

        let mut file = OpenOptions::new().write(true).read(true).open(&self.config.path)?;
        file.seek(SeekFrom::End(0))?;
        writer.file = BufWriter::with_capacity(self.config.buffer_size, file);

        info!(before = position.0, retained, "truncated file log");
        Ok(())
    }
}
