//! Blob payload extraction and decompression.
//!
//! A blob carries its payload either raw or zlib-compressed with a
//! declared decompressed size. Other compression schemes defined by the
//! format (lzma, the obsolete bzip2) are rejected. This module holds no
//! state and is safe to call from any number of workers in parallel.

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::trace;
use prost::Message;

use super::proto;
use super::types::error::{PbfError, Result};

/// Extract the decompressed payload bytes of a blob.
pub(crate) fn payload(blob: &proto::Blob) -> Result<Vec<u8>> {
    if let Some(raw) = &blob.raw {
        trace!("raw blob payload, {} bytes", raw.len());
        return Ok(raw.clone());
    }
    if let Some(zlib) = &blob.zlib_data {
        let expected = blob
            .raw_size
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                PbfError::Format("zlib blob without a valid raw_size".to_string())
            })?;
        trace!(
            "inflating zlib payload: {} bytes -> {} bytes (declared)",
            zlib.len(),
            expected
        );
        let mut inflated = Vec::with_capacity(expected);
        let mut decoder = ZlibDecoder::new(zlib.as_slice());
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| PbfError::Format(format!("zlib inflate failed: {}", e)))?;
        if inflated.len() != expected {
            return Err(PbfError::Format(format!(
                "decompressed size mismatch: expected {} bytes, got {}",
                expected,
                inflated.len()
            )));
        }
        return Ok(inflated);
    }
    if blob.lzma_data.is_some() {
        return Err(PbfError::UnsupportedCompression("lzma"));
    }
    if blob.obsolete_bzip2_data.is_some() {
        return Err(PbfError::UnsupportedCompression("bzip2"));
    }
    Err(PbfError::Format(
        "blob carries no recognized payload".to_string(),
    ))
}

/// Decode a data blob into a [`proto::PrimitiveBlock`].
pub(crate) fn decode_primitive_block(blob: &proto::Blob) -> Result<proto::PrimitiveBlock> {
    let bytes = payload(blob)?;
    Ok(proto::PrimitiveBlock::decode(bytes.as_slice())?)
}
