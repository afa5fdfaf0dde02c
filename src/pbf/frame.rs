//! Blob framing: length-prefixed `(BlobHeader, Blob)` pairs.
//!
//! Each frame on the wire is:
//!
//! ```text
//! [4 bytes] BlobHeader length (big-endian u32)
//! [N bytes] BlobHeader (protobuf), carrying `type` and `datasize`
//! [D bytes] Blob (protobuf)
//! ```

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::trace;
use prost::Message;

use super::proto;
use super::types::error::{PbfError, Result};

/// One framed blob, with its byte range in the stream.
///
/// `start` and `size` cover the length prefix, the header, and the blob
/// payload. `start` is derived from the cumulative byte counter, so it is
/// an absolute file offset as long as reading began at offset zero.
#[derive(Debug)]
pub(crate) struct Frame {
    pub header: proto::BlobHeader,
    pub blob: proto::Blob,
    pub start: u64,
    pub size: u64,
}

/// Pulls framed blobs from a seekable byte source.
///
/// The reader counts every byte consumed from the source, including the
/// bytes of a read that later turns out to be short. The counter is
/// atomic so it can be observed concurrently while the single feeder
/// thread advances the stream.
pub(crate) struct FrameReader<R> {
    source: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read + Seek> FrameReader<R> {
    pub fn new(source: R) -> Self {
        FrameReader {
            source,
            bytes_read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cumulative bytes consumed from the source since construction (or
    /// since the last seek, for callers that reposition the stream).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Shared handle to the byte counter for progress observation.
    pub fn bytes_read_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_read)
    }

    /// Reposition the source to absolute byte `offset`.
    ///
    /// The byte counter is not rewound; it keeps accumulating across the
    /// seek. Callers jumping to offsets obtained from an index should
    /// ignore the counter afterwards.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.source.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read the next framed blob.
    ///
    /// Returns `Ok(None)` on a clean end of stream, i.e. when the source
    /// is exhausted exactly at a frame boundary. Ending anywhere inside a
    /// frame is a [`PbfError::Truncated`] error.
    pub fn read_blob(&mut self) -> Result<Option<Frame>> {
        let start = self.bytes_read();

        let mut len_buf = [0u8; 4];
        let filled = self.read_counted(&mut len_buf)?;
        if filled == 0 {
            trace!("end of stream at offset {}", start);
            return Ok(None);
        }
        if filled < len_buf.len() {
            return Err(PbfError::Truncated {
                context: "blob header length prefix",
            });
        }
        let header_len = BigEndian::read_u32(&len_buf) as usize;

        let mut header_buf = vec![0u8; header_len];
        if self.read_counted(&mut header_buf)? < header_len {
            return Err(PbfError::Truncated {
                context: "blob header",
            });
        }
        let header = proto::BlobHeader::decode(header_buf.as_slice())?;

        let datasize = usize::try_from(header.datasize).map_err(|_| {
            PbfError::Format(format!("negative blob datasize: {}", header.datasize))
        })?;
        let mut blob_buf = vec![0u8; datasize];
        if self.read_counted(&mut blob_buf)? < datasize {
            return Err(PbfError::Truncated { context: "blob" });
        }
        let blob = proto::Blob::decode(blob_buf.as_slice())?;

        let size = self.bytes_read() - start;
        trace!(
            "read {} blob: start={} size={}",
            header.r#type,
            start,
            size
        );
        Ok(Some(Frame {
            header,
            blob,
            start,
            size,
        }))
    }

    /// Fill `buf` from the source, adding every byte actually consumed to
    /// the counter. Returns the number of bytes read, which is short only
    /// when the source ends.
    fn read_counted(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PbfError::Io(e)),
            }
        }
        Ok(filled)
    }
}
