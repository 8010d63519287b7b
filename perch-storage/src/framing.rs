//! # Entry Framing
//!
//! Converts one logical record into one or more physical log entries and
//! back. Records that fit under the entry size limit are written verbatim;
//! larger records are split into a header frame carrying the chunk count and
//! the digest of the whole encoding, followed by digest-tagged chunk frames.
//!
//! ```text
//! serialize(record), len > max:
//!   ┌────────────────────┐ ┌───────────┐     ┌───────────┐
//!   │ Frame::Header      │ │ Frame::   │ ... │ Frame::   │
//!   │ {count, digest(R)} │ │ Chunk[0]  │     │ Chunk[N-1]│
//!   └────────────────────┘ └───────────┘     └───────────┘
//! ```

use bytes::Bytes;

use perch_core::digest::Digest;
use perch_core::error::{Error, Result};

use crate::codec::{self, Decoded, Frame, FrameChunk, FrameHeader, Record};

/// Encoded size reserved for a chunk's envelope (tag, struct framing,
/// digest, length prefix). Chunk payloads are sized so the whole chunk
/// entry stays under the limit.
const FRAME_OVERHEAD: usize = 64;

/// Splits records over the physical entry size limit.
#[derive(Debug, Clone)]
pub struct EntrySerializer {
    max_entry_size: usize,
}

impl EntrySerializer {
    pub fn new(max_entry_size: usize) -> Result<Self> {
        if max_entry_size <= FRAME_OVERHEAD {
            return Err(Error::Configuration {
                message: format!(
                    "max_entry_size must exceed the frame overhead of {} bytes, got {}",
                    FRAME_OVERHEAD, max_entry_size
                ),
            });
        }
        Ok(Self { max_entry_size })
    }

    /// Encode `record` into the physical entries to append, in order.
    pub fn serialize(&self, record: &Record) -> Result<Vec<Bytes>> {
        let encoded = codec::encode(record)?;
        if encoded.len() <= self.max_entry_size {
            return Ok(vec![encoded]);
        }

        let chunk_size = self.max_entry_size - FRAME_OVERHEAD;
        let chunks: Vec<&[u8]> = encoded.chunks(chunk_size).collect();

        let mut entries = Vec::with_capacity(chunks.len() + 1);
        entries.push(codec::encode(&Record::Frame(Frame::Header(FrameHeader {
            chunk_count: chunks.len() as u32,
            checksum: Digest::of(&encoded),
        })))?);
        for chunk in chunks {
            entries.push(codec::encode(&Record::Frame(Frame::Chunk(FrameChunk {
                checksum: Digest::of(chunk),
                data: Bytes::copy_from_slice(chunk),
            })))?);
        }
        Ok(entries)
    }
}

enum ReadState {
    Idle,
    Collecting { header: FrameHeader, received: Vec<u8>, chunks_seen: u32 },
}

/// Streaming reassembly of physical entries back into records.
///
/// Yields [`Decoded`] so the caller decides what to do with record kinds
/// this binary does not know. Fuses after the first error.
pub struct RecordReader<I> {
    entries: I,
    state: ReadState,
    failed: bool,
}

impl<I> RecordReader<I>
where
    I: Iterator<Item = Result<Bytes>>,
{
    pub fn new(entries: I) -> Self {
        Self { entries, state: ReadState::Idle, failed: false }
    }

    fn fail(&mut self, message: String) -> Option<Result<Decoded>> {
        self.failed = true;
        Some(Err(Error::framing(message)))
    }

    fn on_header(&mut self, header: FrameHeader) -> Option<Result<Decoded>> {
        match self.state {
            ReadState::Idle => {
                if header.chunk_count == 0 {
                    return self.fail("frame header declares zero chunks".into());
                }
                self.state = ReadState::Collecting {
                    received: Vec::new(),
                    chunks_seen: 0,
                    header,
                };
                None
            }
            ReadState::Collecting { .. } => {
                self.fail("frame header while a frame is being reassembled".into())
            }
        }
    }

    fn on_chunk(&mut self, chunk: FrameChunk) -> Option<Result<Decoded>> {
        let (chunk_count, total_checksum, seen) = match &self.state {
            ReadState::Idle => {
                return self.fail("frame chunk outside a frame sequence".into());
            }
            ReadState::Collecting { header, chunks_seen, .. } => {
                (header.chunk_count, header.checksum, *chunks_seen)
            }
        };

        if Digest::of(&chunk.data) != chunk.checksum {
            return self.fail(format!(
                "chunk {} of {} failed its digest check",
                seen + 1,
                chunk_count
            ));
        }

        if let ReadState::Collecting { received, chunks_seen, .. } = &mut self.state {
            received.extend_from_slice(&chunk.data);
            *chunks_seen += 1;
        }
        if seen + 1 < chunk_count {
            return None;
        }

        let whole = match std::mem::replace(&mut self.state, ReadState::Idle) {
            ReadState::Collecting { received, .. } => received,
            ReadState::Idle => Vec::new(),
        };
        if Digest::of(&whole) != total_checksum {
            return self.fail("reassembled record failed its digest check".into());
        }
        match codec::decode(&whole) {
            Ok(decoded) => Some(Ok(decoded)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<I> Iterator for RecordReader<I>
where
    I: Iterator<Item = Result<Bytes>>,
{
    type Item = Result<Decoded>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let contents = match self.entries.next() {
                Some(Ok(contents)) => contents,
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => {
                    return match self.state {
                        ReadState::Idle => None,
                        ReadState::Collecting { .. } => {
                            self.fail("log ended inside a frame sequence".into())
                        }
                    };
                }
            };

            let decoded = match codec::decode(&contents) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            let step = match decoded {
                Decoded::Record(Record::Frame(Frame::Header(header))) => self.on_header(header),
                Decoded::Record(Record::Frame(Frame::Chunk(chunk))) => self.on_chunk(chunk),
                other => match self.state {
                    ReadState::Idle => Some(Ok(other)),
                    ReadState::Collecting { .. } => {
                        self.fail("non-frame entry while a frame is being reassembled".into())
                    }
                },
            };
            if let Some(result) = step {
                return Some(result);
            }
        }
    }
}
