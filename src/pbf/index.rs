//! The blob index: a catalogue of blob byte ranges and per-group element
//! summaries, used for seek-based random access and for breakpoint
//! synchronization during parsing.
//!
//! # On-disk layout
//!
//! The encoding is private to this crate but self-describing and
//! round-trippable:
//!
//! ```text
//! [4 bytes] magic "PBFX"
//! [1 byte ] layout version (currently 1)
//! [8 bytes] blob count (little-endian u64)
//! per blob:
//!   [8 bytes] start   [8 bytes] size   [4 bytes] group count
//!   per group: [1 byte] type  [8 bytes] count  [8 bytes] low  [8 bytes] high
//! [8 bytes] breakpoint count, then one u64 per breakpoint
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use super::types::error::{PbfError, Result};
use super::types::models::ElementType;

const INDEX_MAGIC: &[u8; 4] = b"PBFX";
const INDEX_VERSION: u8 = 1;

/// Summary of one primitive group: element kind, count, and id interval.
///
/// Only recorded for non-empty groups, so `low <= high` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    pub element_type: ElementType,
    pub count: u64,
    /// Smallest element id in the group after delta decoding.
    pub low: i64,
    /// Largest element id in the group after delta decoding.
    pub high: i64,
}

/// Byte range of one blob plus its group summaries, in file order.
///
/// `start` is the offset of the blob's length prefix; `size` covers the
/// prefix, the `BlobHeader`, and the `Blob` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobInfo {
    pub start: u64,
    pub size: u64,
    pub groups: Vec<GroupInfo>,
}

/// An index of all blobs in a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobIndex {
    /// Blobs in strictly increasing `start` order.
    pub blobs: Vec<BlobInfo>,
    /// Offsets the parse feeder quiesces at: the first way blob and the
    /// first relation blob, when they exist.
    pub breakpoints: Vec<u64>,
}

impl BlobIndex {
    /// Start offsets of every blob containing at least one group of
    /// `element_type` whose `[low, high]` interval contains `id`.
    ///
    /// Intervals may overlap across blobs; callers probe each candidate.
    ///
    /// # Errors
    /// [`PbfError::NotFound`] when no blob matches.
    pub fn blob_offsets(&self, element_type: ElementType, id: i64) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        for info in &self.blobs {
            for group in &info.groups {
                if group.element_type == element_type && id >= group.low && id <= group.high {
                    offsets.push(info.start);
                    break;
                }
            }
        }
        if offsets.is_empty() {
            return Err(PbfError::NotFound);
        }
        Ok(offsets)
    }

    /// Start offset of the first blob with any group of `element_type`.
    ///
    /// # Errors
    /// [`PbfError::NotFound`] when the type does not occur in the file.
    pub fn first_offset_of_type(&self, element_type: ElementType) -> Result<u64> {
        for info in &self.blobs {
            if info
                .groups
                .iter()
                .any(|group| group.element_type == element_type)
            {
                return Ok(info.start);
            }
        }
        Err(PbfError::NotFound)
    }

    /// Recompute breakpoints as the starts of the first way blob and the
    /// first relation blob, dropping the absent (and the degenerate
    /// zero-offset) ones while preserving order.
    pub fn set_breakpoints(&mut self) {
        self.breakpoints.clear();
        for element_type in [ElementType::Way, ElementType::Relation] {
            if let Ok(offset) = self.first_offset_of_type(element_type) {
                if offset > 0 {
                    self.breakpoints.push(offset);
                }
            }
        }
        debug!("breakpoints set: {:?}", self.breakpoints);
    }

    /// Serialize the index.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(INDEX_MAGIC)?;
        sink.write_u8(INDEX_VERSION)?;
        sink.write_u64::<LittleEndian>(self.blobs.len() as u64)?;
        for info in &self.blobs {
            sink.write_u64::<LittleEndian>(info.start)?;
            sink.write_u64::<LittleEndian>(info.size)?;
            sink.write_u32::<LittleEndian>(info.groups.len() as u32)?;
            for group in &info.groups {
                sink.write_u8(group.element_type.code())?;
                sink.write_u64::<LittleEndian>(group.count)?;
                sink.write_i64::<LittleEndian>(group.low)?;
                sink.write_i64::<LittleEndian>(group.high)?;
            }
        }
        sink.write_u64::<LittleEndian>(self.breakpoints.len() as u64)?;
        for &offset in &self.breakpoints {
            sink.write_u64::<LittleEndian>(offset)?;
        }
        Ok(())
    }

    /// Deserialize an index and recompute its breakpoints.
    ///
    /// # Errors
    /// [`PbfError::Format`] on a bad magic, unknown layout version, or
    /// out-of-order blob records; [`PbfError::Io`] on short reads.
    pub fn read_from<R: Read>(source: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(PbfError::Format("not an index file".to_string()));
        }
        let version = source.read_u8()?;
        if version != INDEX_VERSION {
            return Err(PbfError::Format(format!(
                "unknown index layout version: {}",
                version
            )));
        }

        let blob_count = source.read_u64::<LittleEndian>()?;
        let mut blobs = Vec::with_capacity(blob_count.min(1 << 20) as usize);
        for _ in 0..blob_count {
            let start = source.read_u64::<LittleEndian>()?;
            let size = source.read_u64::<LittleEndian>()?;
            if blobs.last().is_some_and(|prev: &BlobInfo| start <= prev.start) {
                return Err(PbfError::Format(
                    "index blobs are not in increasing start order".to_string(),
                ));
            }
            let group_count = source.read_u32::<LittleEndian>()?;
            let mut groups = Vec::with_capacity(group_count.min(1 << 16) as usize);
            for _ in 0..group_count {
                let element_type = ElementType::from_code(source.read_u8()?)?;
                let count = source.read_u64::<LittleEndian>()?;
                let low = source.read_i64::<LittleEndian>()?;
                let high = source.read_i64::<LittleEndian>()?;
                groups.push(GroupInfo {
                    element_type,
                    count,
                    low,
                    high,
                });
            }
            blobs.push(BlobInfo {
                start,
                size,
                groups,
            });
        }

        let breakpoint_count = source.read_u64::<LittleEndian>()?;
        let mut breakpoints = Vec::with_capacity(breakpoint_count.min(1 << 10) as usize);
        for _ in 0..breakpoint_count {
            breakpoints.push(source.read_u64::<LittleEndian>()?);
        }

        let mut index = BlobIndex { blobs, breakpoints };
        index.set_breakpoints();
        Ok(index)
    }

    /// Write the index to a file, creating or replacing it.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!("writing index to {}", path.display());
        let mut sink = BufWriter::new(File::create(path)?);
        self.write_to(&mut sink)?;
        sink.flush()?;
        Ok(())
    }

    /// Read an index from a file.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("reading index from {}", path.display());
        let mut source = BufReader::new(File::open(path)?);
        Self::read_from(&mut source)
    }
}
