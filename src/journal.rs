//! Market-event journal - binary capture/replay format
//!
//! The live pipeline can tee decoded events into a journal; the backtester
//! replays a journal byte-deterministically. Entries are length-prefixed
//! with a fixed header and a CRC32-protected bincode payload.
//!
//! # Header layout (20 bytes, little-endian)
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────────────────────┐
//! │ payload_len│ 2 bytes │ payload size                     │
//! │ entry_type │ 1 byte  │ 1 = MarketEvent                  │
//! │ version    │ 1 byte  │ payload format version           │
//! │ epoch      │ 4 bytes │ capture session                  │
//! │ seq        │ 8 bytes │ monotonic within epoch           │
//! │ checksum   │ 4 bytes │ CRC32 of payload                 │
//! └────────────┴─────────┴──────────────────────────────────┘
//! ```
//!
//! A read that hits EOF mid-entry is a clean truncation (the tail write
//! never landed); a checksum mismatch is corruption and surfaces as an
//! error.

use crate::events::MarketEvent;
use crc32fast::Hasher;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Journal header size in bytes
pub const JOURNAL_HEADER_SIZE: usize = 20;

/// Entry types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntryType {
    MarketEvent = 1,
}

/// Fixed journal entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub payload_len: u16,
    pub entry_type: u8,
    pub version: u8,
    pub epoch: u32,
    pub seq: u64,
    pub checksum: u32,
}

impl JournalHeader {
    fn new(entry_type: JournalEntryType, epoch: u32, seq: u64, payload: &[u8]) -> Self {
        Self {
            payload_len: payload.len() as u16,
            entry_type: entry_type as u8,
            version: 0,
            epoch,
            seq,
            checksum: crc32(payload),
        }
    }

    fn to_bytes(self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[2] = self.entry_type;
        buf[3] = self.version;
        buf[4..8].copy_from_slice(&self.epoch.to_le_bytes());
        buf[8..16].copy_from_slice(&self.seq.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; JOURNAL_HEADER_SIZE]) -> Self {
        Self {
            payload_len: u16::from_le_bytes([buf[0], buf[1]]),
            entry_type: buf[2],
            version: buf[3],
            epoch: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            seq: u64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
            checksum: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }
    }
}

#[inline]
fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Appends market events to a journal file
pub struct JournalWriter {
    out: BufWriter<File>,
    epoch: u32,
    next_seq: u64,
}

impl JournalWriter {
    pub fn create(path: &Path, epoch: u32) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            epoch,
            next_seq: 1,
        })
    }

    /// Append one event; returns its journal sequence
    pub fn append(&mut self, event: &MarketEvent) -> io::Result<u64> {
        let payload = bincode::serialize(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let header =
            JournalHeader::new(JournalEntryType::MarketEvent, self.epoch, self.next_seq, &payload);
        self.out.write_all(&header.to_bytes())?;
        self.out.write_all(&payload)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(seq)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Entries written so far
    pub fn len(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 1
    }
}

/// Sequential journal reader
pub struct JournalReader {
    input: BufReader<File>,
    expect_seq: u64,
}

impl JournalReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            input: BufReader::new(File::open(path)?),
            expect_seq: 1,
        })
    }

    /// Read the next event.
    ///
    /// `Ok(None)` at clean EOF or a truncated tail entry; `Err` on
    /// checksum/format corruption or a sequence discontinuity.
    pub fn next_event(&mut self) -> io::Result<Option<MarketEvent>> {
        let mut header_buf = [0u8; JOURNAL_HEADER_SIZE];
        match read_exact_or_eof(&mut self.input, &mut header_buf)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Ok(None), // torn tail write
            ReadOutcome::Full => {}
        }
        let header = JournalHeader::from_bytes(&header_buf);

        if header.entry_type != JournalEntryType::MarketEvent as u8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown journal entry type {}", header.entry_type),
            ));
        }
        if header.seq != self.expect_seq {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "journal sequence discontinuity: expected {}, got {}",
                    self.expect_seq, header.seq
                ),
            ));
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        match read_exact_or_eof(&mut self.input, &mut payload)? {
            ReadOutcome::Full => {}
            _ => return Ok(None), // torn tail write
        }
        if crc32(&payload) != header.checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("journal checksum mismatch at seq {}", header.seq),
            ));
        }

        let event: MarketEvent = bincode::deserialize(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.expect_seq += 1;
        Ok(Some(event))
    }

    /// Drain the whole journal into memory
    pub fn read_all(&mut self) -> io::Result<Vec<MarketEvent>> {
        let mut events = Vec::new();
        while let Some(ev) = self.next_event()? {
            events.push(ev);
        }
        Ok(events)
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}
