//! A streaming reader for the OpenStreetMap PBF format (`*.osm.pbf`).
//!
//! The format is a sequence of length-framed blobs, each a protobuf
//! message holding a raw or zlib-compressed block of delta-coded
//! elements. This crate decodes such files of arbitrary size with
//! bounded memory: a single feeder reads blobs off the file while a pool
//! of workers decompresses and decodes them in parallel, streaming
//! nodes, ways, and relations into a caller-supplied [`ElementSink`].
//!
//! Optionally a [`BlobIndex`] is built during the run and persisted next
//! to the input as `<input>.idx`. On later runs the index is autoloaded,
//! which enables two things:
//!
//! - **Random access**: [`BlobIndex::blob_offsets`] finds the blobs that
//!   may contain a given element id, and [`Decoder::parse_blob`] decodes
//!   exactly one of them.
//! - **Phased delivery**: at the recorded element-type transitions
//!   (nodes→ways, ways→relations) the decoder quiesces all in-flight
//!   work before reading on, so a sink sees every node before the first
//!   way and every way before the first relation. Registered triggers
//!   fire at each of these breakpoints.
//!
//! # Example
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use pbf_reader::{Decoder, ElementSink, Node, Relation, Way};
//!
//! #[derive(Default)]
//! struct Counter(AtomicU64);
//!
//! impl ElementSink for Counter {
//!     fn on_node(&self, _: Node) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!     fn on_way(&self, _: Way) {}
//!     fn on_relation(&self, _: Relation) {}
//! }
//!
//! let mut decoder = Decoder::from_path("extract.osm.pbf")?;
//! let counter = Counter::default();
//! decoder.parse(&counter, false)?;
//! println!("{} nodes", counter.0.load(Ordering::Relaxed));
//! # Ok::<(), pbf_reader::PbfError>(())
//! ```

pub mod pbf;

pub use pbf::{
    BlobIndex, BlobInfo, Config, Decoder, ElementSink, ElementType, GroupInfo, Member, Node,
    PbfError, Relation, Result, Tags, Way,
};
