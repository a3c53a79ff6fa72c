use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::booking::Booking;
use crate::model::{BookingId, RentalItemId};
use crate::rental_item::RentalItem;

/// One durable store mutation. Saves carry the full aggregate, so replay is last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreRecord {
    BookingSaved(Booking),
    BookingDeleted(BookingId),
    ItemSaved(RentalItem),
    ItemDeleted(RentalItemId),
}

/// Encode a single record to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, record: &StoreRecord) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log backing `InMemoryStore`.
///
/// Format per entry: `[u32: len][bincode: StoreRecord][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is discarded on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append a batch and fsync once.
    pub fn append(&mut self, records: &[StoreRecord]) -> io::Result<()> {
        let mut append_err = None;
        for record in records {
            if let Err(e) = encode_record(&mut self.writer, record) {
                append_err = Some(e);
                break;
            }
            self.appends_since_compact += 1;
        }
        // Flush even on error so a half-written batch doesn't leak into the next one.
        let flush_result = self.flush_sync();
        if let Some(e) = append_err {
            return Err(e);
        }
        flush_result
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `records` (the live state) via temp file + atomic rename.
    pub fn compact(&mut self, records: &[StoreRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                encode_record(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay the log at `path`, cut off any torn or corrupt tail, and open it for appends.
    ///
    /// New entries must land directly after the last intact record, otherwise the
    /// next replay would stop at the garbage and never reach them.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<StoreRecord>)> {
        let (records, intact_len) = read_records(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact_len
        {
            tracing::warn!(
                "wal {}: truncating {} trailing bytes",
                path.display(),
                meta.len() - intact_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, records))
    }

    /// Read every intact record. Stops silently at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreRecord>> {
        read_records(path).map(|(records, _)| records)
    }
}

/// Upper bound on one encoded record; anything larger is a corrupt length field.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Intact records plus the byte length of the prefix they occupy.
fn read_records(path: &Path) -> io::Result<(Vec<StoreRecord>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut intact_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            tracing::warn!("wal {}: record length {len} out of range, dropping tail", path.display());
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            tracing::warn!("wal {}: crc mismatch, dropping tail", path.display());
            break;
        }

        match bincode::deserialize::<StoreRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("wal {}: undecodable record ({e}), dropping tail", path.display());
                break;
            }
        }
        intact_len += 8 + len as u64;
    }

    Ok((records, intact_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentline_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn ids(records: &[StoreRecord]) -> Vec<Ulid> {
        records
            .iter()
            .map(|r| match r {
                StoreRecord::BookingDeleted(id) | StoreRecord::ItemDeleted(id) => *id,
                StoreRecord::BookingSaved(b) => b.id(),
                StoreRecord::ItemSaved(i) => i.id(),
            })
            .collect()
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let records = vec![
            StoreRecord::BookingDeleted(Ulid::new()),
            StoreRecord::ItemDeleted(Ulid::new()),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&records).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(ids(&replayed), ids(&records));
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let record = StoreRecord::BookingDeleted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&record)).unwrap();
        }
        // partial length + some bytes
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(ids(&replayed), ids(&[record]));
    }

    #[test]
    fn recover_cuts_torn_tail_so_later_appends_replay() {
        let path = tmp_path("recover_torn.wal");
        let first = StoreRecord::ItemDeleted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&first)).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xFF, 0, 0, 0, 1, 2]).unwrap();
        }

        let second = StoreRecord::BookingDeleted(Ulid::new());
        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert_eq!(ids(&replayed), ids(std::slice::from_ref(&first)));
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.append(std::slice::from_ref(&second)).unwrap();
        }
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(ids(&replayed), ids(&[first, second]));
    }

    #[test]
    fn oversized_length_is_treated_as_torn_tail() {
        let path = tmp_path("oversized_len.wal");
        let record = StoreRecord::ItemDeleted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&record)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[7u8; 16]).unwrap();
        }
        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(ids(&replayed), ids(&[record]));
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&StoreRecord::ItemDeleted(Ulid::new())).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let keep = StoreRecord::ItemDeleted(Ulid::new());
        let after = StoreRecord::BookingDeleted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            let churn: Vec<_> = (0..20).map(|_| StoreRecord::BookingDeleted(Ulid::new())).collect();
            wal.append(&churn).unwrap();
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let compacted = fs::metadata(&path).unwrap().len();
            assert!(compacted < before, "compacted log should be smaller: {compacted} < {before}");

            wal.append(std::slice::from_ref(&after)).unwrap();
        }
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(ids(&replayed), ids(&[keep, after]));
    }
}
