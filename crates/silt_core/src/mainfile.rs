//! Sorted-file record framing, writer, and reader.
//!
//! The main index file and delta files share one record format:
//!
//! ```text
//! [body_len u32][flag u8][key_len u32][key][value][crc u32]
//! ```
//!
//! `body_len` covers everything after itself, CRC included. The flag
//! distinguishes live data from tombstones. The main file holds live entries
//! in ascending key order and never contains tombstones (compaction elides
//! them); delta files are flushed write-tier snapshots and may contain
//! tombstones.

use crate::bloom::{BloomFilter, KeyHashes};
use crate::config::SegmentConfig;
use crate::error::{CoreError, CoreResult};
use crate::sparse::{Anchor, SparseIndex};
use crate::types::{Entry, Value};
use silt_storage::{FileReader, FileWriter};

const FLAG_DATA: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

/// Encodes one entry into the record format.
pub(crate) fn encode_record(entry: &Entry) -> Vec<u8> {
    let (flag, payload): (u8, &[u8]) = match &entry.value {
        Value::Data(data) => (FLAG_DATA, data),
        Value::Tombstone => (FLAG_TOMBSTONE, &[]),
    };

    let body_len = 1 + 4 + entry.key.len() + payload.len();
    let mut buf = Vec::with_capacity(4 + body_len + 4);
    buf.extend_from_slice(&((body_len + 4) as u32).to_le_bytes());
    buf.push(flag);
    buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf[4..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Reads and decodes the record at `offset`.
///
/// Returns the entry and the offset of the next record.
pub(crate) fn read_record(
    reader: &dyn FileReader,
    offset: u64,
) -> CoreResult<(Entry, u64)> {
    let len_bytes = reader.read_at(offset, 4)?;
    let body_len =
        u32::from_le_bytes(len_bytes.as_slice().try_into().unwrap_or_default()) as usize;
    if body_len < 1 + 4 + 4 {
        return Err(CoreError::corrupted("record length too small"));
    }

    let body = reader.read_at(offset + 4, body_len)?;
    let crc_start = body_len - 4;
    let stored_crc =
        u32::from_le_bytes(body[crc_start..].try_into().unwrap_or_default());
    let computed_crc = crc32fast::hash(&body[..crc_start]);
    if stored_crc != computed_crc {
        return Err(CoreError::ChecksumMismatch {
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let flag = body[0];
    let key_len = u32::from_le_bytes(body[1..5].try_into().unwrap_or_default()) as usize;
    if 1 + 4 + key_len > crc_start {
        return Err(CoreError::corrupted("record key extends past body"));
    }
    let key = body[5..5 + key_len].to_vec();
    let value = match flag {
        FLAG_DATA => Value::Data(body[5 + key_len..crc_start].to_vec()),
        FLAG_TOMBSTONE => Value::Tombstone,
        other => {
            return Err(CoreError::corrupted(format!(
                "unknown record flag {other}"
            )))
        }
    };

    Ok((Entry { key, value }, offset + 4 + body_len as u64))
}

/// Streams sorted live entries into a new main-file generation, building the
/// bloom filter and sparse index alongside.
///
/// The caller writes to temporary names and renames them over the previous
/// generation after [`MainFileWriter::finish`] returns.
pub(crate) struct MainFileWriter {
    file: Box<dyn FileWriter>,
    page_len: usize,
    bloom_bits_per_key: usize,
    bloom_hash_count: u32,
    hashes: Vec<KeyHashes>,
    anchors: Vec<Anchor>,
    count: u64,
    offset: u64,
}

impl MainFileWriter {
    pub(crate) fn new(file: Box<dyn FileWriter>, config: &SegmentConfig) -> Self {
        Self {
            file,
            page_len: config.sparse_index_page_len,
            bloom_bits_per_key: config.bloom_bits_per_key,
            bloom_hash_count: config.bloom_hash_count,
            hashes: Vec::new(),
            anchors: Vec::new(),
            count: 0,
            offset: 0,
        }
    }

    /// Appends one live entry. Keys must arrive in strictly ascending order.
    pub(crate) fn add(&mut self, key: &[u8], data: &[u8]) -> CoreResult<()> {
        if self.count as usize % self.page_len == 0 {
            self.anchors.push(Anchor {
                key: key.to_vec(),
                offset: self.offset,
            });
        }
        self.hashes.push(KeyHashes::of(key));

        let record = encode_record(&Entry::new(key.to_vec(), data.to_vec()));
        self.file.append(&record)?;
        self.offset += record.len() as u64;
        self.count += 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Syncs the file and returns the finished bloom filter and sparse
    /// index, sized exactly for the written key set.
    pub(crate) fn finish(mut self) -> CoreResult<(u64, BloomFilter, SparseIndex)> {
        self.file.flush()?;
        self.file.sync()?;
        let bloom = BloomFilter::build(
            &self.hashes,
            self.bloom_bits_per_key,
            self.bloom_hash_count,
        );
        let sparse = SparseIndex::new(self.anchors);
        Ok((self.count, bloom, sparse))
    }
}

/// Sequential iterator over every record of a sorted file.
pub(crate) struct RecordIter {
    reader: Box<dyn FileReader>,
    offset: u64,
    size: u64,
}

impl RecordIter {
    pub(crate) fn new(reader: Box<dyn FileReader>) -> CoreResult<Self> {
        let size = reader.size()?;
        Ok(Self {
            reader,
            offset: 0,
            size,
        })
    }
}

impl Iterator for RecordIter {
    type Item = CoreResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.size {
            return None;
        }
        match read_record(self.reader.as_ref(), self.offset) {
            Ok((entry, next_offset)) => {
                self.offset = next_offset;
                Some(Ok(entry))
            }
            Err(e) => {
                self.offset = self.size;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_storage::{MemoryDirectory, SegmentDirectory};

    fn write_entries(dir: &MemoryDirectory, name: &str, entries: &[(&[u8], &[u8])]) {
        let config = SegmentConfig::default().sparse_index_page_len(2);
        let mut writer = MainFileWriter::new(dir.create(name).unwrap(), &config);
        for (key, value) in entries {
            writer.add(key, value).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn record_round_trip() {
        let dir = MemoryDirectory::new();
        let mut file = dir.create("x").unwrap();
        file.append(&encode_record(&Entry::new(b"k".to_vec(), b"v".to_vec())))
            .unwrap();
        file.append(&encode_record(&Entry::tombstone(b"z".to_vec())))
            .unwrap();

        let reader = dir.open("x").unwrap();
        let (first, next) = read_record(reader.as_ref(), 0).unwrap();
        assert_eq!(first, Entry::new(b"k".to_vec(), b"v".to_vec()));

        let (second, _) = read_record(reader.as_ref(), next).unwrap();
        assert_eq!(second, Entry::tombstone(b"z".to_vec()));
    }

    #[test]
    fn corrupted_record_is_detected() {
        let dir = MemoryDirectory::new();
        let mut record = encode_record(&Entry::new(b"k".to_vec(), b"v".to_vec()));
        let flip = record.len() - 6;
        record[flip] ^= 0xff;
        dir.create("x").unwrap().append(&record).unwrap();

        let reader = dir.open("x").unwrap();
        assert!(matches!(
            read_record(reader.as_ref(), 0),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn writer_builds_bloom_and_sparse() {
        let dir = MemoryDirectory::new();
        let config = SegmentConfig::default().sparse_index_page_len(2);
        let mut writer = MainFileWriter::new(dir.create("main").unwrap(), &config);
        for key in [b"a", b"b", b"c", b"d", b"e"] {
            writer.add(key, b"v").unwrap();
        }
        let (count, bloom, sparse) = writer.finish().unwrap();

        assert_eq!(count, 5);
        // Anchors at entries 0, 2, 4.
        assert_eq!(sparse.len(), 3);
        assert!(bloom.may_contain(b"a"));
        assert!(bloom.may_contain(b"e"));
    }

    #[test]
    fn sparse_anchor_offsets_point_at_records() {
        let dir = MemoryDirectory::new();
        write_entries(&dir, "main", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);

        let config = SegmentConfig::default().sparse_index_page_len(2);
        let mut writer = MainFileWriter::new(dir.create("again").unwrap(), &config);
        for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
            writer.add(k, v).unwrap();
        }
        let (_, _, sparse) = writer.finish().unwrap();

        let reader = dir.open("again").unwrap();
        let offset = sparse.floor_offset(b"c").unwrap();
        let (entry, _) = read_record(reader.as_ref(), offset).unwrap();
        assert_eq!(entry.key, b"c");
    }

    #[test]
    fn record_iter_yields_all_entries() {
        let dir = MemoryDirectory::new();
        write_entries(&dir, "main", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);

        let iter = RecordIter::new(dir.open("main").unwrap()).unwrap();
        let keys: Vec<Vec<u8>> = iter.map(|e| e.unwrap().key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn record_iter_over_empty_file() {
        let dir = MemoryDirectory::new();
        dir.create("empty").unwrap();

        let mut iter = RecordIter::new(dir.open("empty").unwrap()).unwrap();
        assert!(iter.next().is_none());
    }
}
