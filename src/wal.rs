use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only event log backing the engine state.
///
/// Records are framed as a little-endian `u32` payload length, the
/// bincode-encoded event, and a crc32 of the payload. A record that runs
/// past the end of the file or fails its checksum is the torn tail of a
/// crashed run; `load` stops there and everything before it is kept.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    frame: Vec<u8>,
    appends_since_compaction: u64,
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn encode_into(buf: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(open_for_append(path)?),
            path: path.to_path_buf(),
            frame: Vec::new(),
            appends_since_compaction: 0,
        })
    }

    /// Buffer one event without making it durable. Nothing is promised to
    /// callers until the next `sync`; the writer task batches several pushes
    /// per sync.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        self.frame.clear();
        encode_into(&mut self.frame, event)?;
        self.out.write_all(&self.frame)?;
        self.appends_since_compaction += 1;
        Ok(())
    }

    /// Drain the buffer and fsync.
    pub fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    /// push + sync in one step, for tests that don't batch.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.push(event)?;
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compaction(&self) -> u64 {
        self.appends_since_compaction
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("wal.new")
    }

    /// Write a replacement log holding only `events` next to the live one,
    /// fully synced. The slow half of compaction; does not touch the live
    /// file, so appends may continue until `adopt_compaction`.
    pub fn stage_compaction(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            encode_into(&mut buf, event)?;
        }
        let mut file = File::create(Self::staging_path(path))?;
        file.write_all(&buf)?;
        file.sync_all()
    }

    /// Rename the staged log over the live one and reopen for appending.
    pub fn adopt_compaction(&mut self) -> io::Result<()> {
        fs::rename(Self::staging_path(&self.path), &self.path)?;
        self.out = BufWriter::new(open_for_append(&self.path)?);
        self.appends_since_compaction = 0;
        Ok(())
    }

    /// Both compaction halves back to back, for tests.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::stage_compaction(&self.path, events)?;
        self.adopt_compaction()
    }

    /// Read every intact event from the log at `path`. A missing file is an
    /// empty log, not an error.
    pub fn load(path: &Path) -> io::Result<Vec<Event>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut events = Vec::new();
        let mut at = 0usize;
        loop {
            let Some(len) = read_u32(&bytes, at) else { break };
            let payload_at = at + 4;
            let Some(payload) = bytes.get(payload_at..payload_at + len as usize) else {
                break;
            };
            let Some(stored_crc) = read_u32(&bytes, payload_at + len as usize) else {
                break;
            };
            if crc32fast::hash(payload) != stored_crc {
                break;
            }
            let Ok(event) = bincode::deserialize::<Event>(payload) else {
                break;
            };
            events.push(event);
            at = payload_at + len as usize + 4;
        }
        Ok(events)
    }
}
