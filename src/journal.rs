use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Larger length prefixes can only come from a torn or corrupt header.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a single record as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "journal record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one record and its size on disk. `Ok(None)` marks the end of the
/// usable log: clean EOF, a truncated tail, or a record failing its checksum.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    // A record that passed its checksum is not a torn write.
    let event = bincode::deserialize::<Event>(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some((event, (len + 8) as u64)))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Every valid record plus the byte length of the prefix holding them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, size)) = decode_record(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

/// The file a journal appends to. Opened in append mode, so a write after
/// `set_len` lands at the new end.
pub trait LogFile: Write {
    fn set_len(&self, len: u64) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only record log backing the engine's in-memory stores.
///
/// Format per record: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// Each batch is written and fsynced as one unit; a failed batch is cut off
/// again, so the file only ever grows by whole committed batches.
pub struct Journal<F: LogFile = File> {
    file: F,
    path: PathBuf,
    /// Length of the committed prefix. Anything past it is a failed batch.
    len: u64,
    /// A failed batch could not be cut off yet.
    dirty: bool,
    appends_since_compact: u64,
}

impl<F: LogFile> Journal<F> {
    /// Write `events` as a single all-or-nothing batch.
    ///
    /// On error nothing from the batch remains in the file.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        if self.dirty {
            self.truncate_to_committed()?;
        }
        let mut buf = Vec::new();
        for event in events {
            encode_record(&mut buf, event)?;
        }
        if let Err(e) = self.file.write_all(&buf).and_then(|()| self.file.sync_all()) {
            self.dirty = true;
            if let Err(rollback) = self.truncate_to_committed() {
                error!(path = %self.path.display(), "journal rollback failed: {rollback}");
            }
            return Err(e);
        }
        self.len += buf.len() as u64;
        self.appends_since_compact += events.len() as u64;
        Ok(())
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.sync_all()?;
        self.dirty = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

impl Journal {
    /// Open for appending. A torn or corrupt tail left by a crash is cut off
    /// so new records follow the last valid one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = scan(path)?;
        let file = open_append(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "truncating unreadable journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: valid_len,
            dirty: false,
            appends_since_compact: 0,
        })
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("journal.tmp")
    }

    /// Write a compacted log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            encode_record(&mut buf, event)?;
        }
        let mut file = File::create(Self::tmp_path(path))?;
        file.write_all(&buf)?;
        file.sync_all()
    }

    /// Rename the compacted file over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        self.file = open_append(&self.path)?;
        self.len = self.file.metadata()?.len();
        self.dirty = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every valid record from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
