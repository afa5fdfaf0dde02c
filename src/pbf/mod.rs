//! Core OSM PBF reader module.
//!
//! [`Decoder`] drives the pipeline: a single feeder pulls framed blobs
//! from the source into a bounded queue, a pool of workers decompresses
//! and decodes them in parallel, and decoded elements stream into the
//! caller's [`ElementSink`]. With indexing enabled the run also builds a
//! [`BlobIndex`] that later runs load to seek straight to the blob
//! containing a given element.

pub mod index;
pub mod proto;
pub mod types;

mod blob;
mod block;
mod frame;

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::bounded;
use log::{debug, info};
use prost::Message;

use frame::FrameReader;
pub use index::{BlobIndex, BlobInfo, GroupInfo};
pub use types::error::{PbfError, Result};
pub use types::models::{
    Config, ElementSink, ElementType, Member, Node, Relation, Tags, Way,
};

/// Header features this reader understands. A file whose header requires
/// anything else is rejected.
const KNOWN_REQUIRED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];

/// A consumer-supplied action invoked at a breakpoint with the
/// breakpoint's index and byte offset.
type Trigger = Box<dyn Fn(usize, u64) + Send + Sync>;

/// What the feeder hands to a worker: the blob plus, when indexing, the
/// position of its [`BlobInfo`] record so the worker can attach group
/// summaries to it.
struct Envelope {
    blob_no: Option<usize>,
    blob: proto::Blob,
}

/// A streaming decoder for OSM PBF data.
///
/// Construct with [`Decoder::from_path`] for file sources (which also
/// autoloads a sibling `<path>.idx` index when present) or
/// [`Decoder::new`] over any `Read + Seek` source.
pub struct Decoder<R> {
    frame: FrameReader<R>,
    config: Config,
    index: Option<BlobIndex>,
    index_path: Option<PathBuf>,
    triggers: Vec<Trigger>,
}

impl Decoder<BufReader<File>> {
    /// Open a `.osm.pbf` file.
    ///
    /// If a sibling `<path>.idx` file exists, the blob index is loaded
    /// from it. A missing index file is not an error; an unreadable one
    /// is.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening {}", path.display());
        let source = BufReader::new(File::open(path)?);
        let mut decoder = Decoder::new(source);
        decoder.index_path = Some(sibling_index_path(path));
        decoder.autoload_index()?;
        Ok(decoder)
    }
}

impl<R: Read + Seek> Decoder<R> {
    /// Wrap an arbitrary seekable byte source. No index is autoloaded
    /// and a successful indexed parse has nowhere to autosave to.
    pub fn new(source: R) -> Self {
        Decoder {
            frame: FrameReader::new(source),
            config: Config::default(),
            index: None,
            index_path: None,
            triggers: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Cumulative bytes consumed from the source.
    pub fn bytes_read(&self) -> u64 {
        self.frame.bytes_read()
    }

    /// Shared handle to the byte counter, for progress reporting from
    /// another thread while [`parse`](Self::parse) runs.
    pub fn bytes_read_handle(&self) -> Arc<AtomicU64> {
        self.frame.bytes_read_handle()
    }

    /// Register an action to run at every breakpoint event. All
    /// registered triggers are invoked once per event, after every
    /// element preceding the breakpoint has been delivered and before
    /// any element after it.
    pub fn register_trigger<F>(&mut self, trigger: F)
    where
        F: Fn(usize, u64) + Send + Sync + 'static,
    {
        self.triggers.push(Box::new(trigger));
    }

    /// The current in-memory index, if one was loaded or built.
    pub fn index(&self) -> Option<&BlobIndex> {
        self.index.as_ref()
    }

    pub fn set_index(&mut self, index: BlobIndex) {
        self.index = Some(index);
    }

    pub fn take_index(&mut self) -> Option<BlobIndex> {
        self.index.take()
    }

    /// Parse the whole stream, delivering every element to `sink`.
    ///
    /// Unless `skip_header_check` is set, the first blob must be an
    /// `OSMHeader` whose required features are all understood by this
    /// reader. Blobs are then decoded by a worker pool; the first error
    /// from any part of the pipeline aborts the run and is returned.
    /// Elements delivered before the error are not retracted.
    ///
    /// When breakpoints are present (from a loaded index), the feeder
    /// quiesces all in-flight blobs at each breakpoint offset before
    /// reading past it, so sinks observe every node before the first
    /// way, and every way before the first relation.
    ///
    /// On success with indexing enabled, the rebuilt index is written to
    /// the sibling `.idx` file if this decoder was opened from a path.
    ///
    /// Byte accounting is cumulative over the life of the decoder; mixing
    /// [`parse_blob`](Self::parse_blob) calls and `parse` on one decoder
    /// is not supported.
    pub fn parse<S: ElementSink + Sync>(&mut self, sink: &S, skip_header_check: bool) -> Result<()> {
        if self.config.indexing || self.index.is_none() {
            self.index = Some(BlobIndex::default());
        }
        let indexing = self.config.indexing;

        let owned = self.index.take().unwrap_or_default();
        let breakpoints = owned.breakpoints.clone();
        let index = Mutex::new(owned);

        let result = self.run_pipeline(&index, &breakpoints, sink, skip_header_check, indexing);
        self.index = Some(index.into_inner().expect("poisoned index mutex"));
        result?;

        if indexing {
            if let (Some(path), Some(index)) = (&self.index_path, &self.index) {
                info!("autosaving index to {}", path.display());
                index.write_to_file(path)?;
            }
        }
        Ok(())
    }

    /// Decode exactly one blob at absolute byte `offset` on the calling
    /// thread, delivering its elements to `sink`.
    ///
    /// Used with offsets obtained from [`BlobIndex::blob_offsets`]. A
    /// clean end of stream at `offset` returns `Ok(())`. The in-memory
    /// index is left untouched.
    pub fn parse_blob<S: ElementSink + ?Sized>(&mut self, sink: &S, offset: u64) -> Result<()> {
        self.frame.seek_to(offset)?;
        let Some(frame) = self.frame.read_blob()? else {
            return Ok(());
        };
        let decoded = blob::decode_primitive_block(&frame.blob)?;
        block::decode_block(&decoded, sink)?;
        Ok(())
    }

    fn run_pipeline<S: ElementSink + Sync>(
        &mut self,
        index: &Mutex<BlobIndex>,
        breakpoints: &[u64],
        sink: &S,
        skip_header_check: bool,
        indexing: bool,
    ) -> Result<()> {
        if !skip_header_check {
            match self.frame.read_blob()? {
                // An empty input is a clean end of stream, not an error.
                None => return Ok(()),
                Some(frame) => {
                    verify_osm_header(&frame)?;
                    if indexing {
                        index
                            .lock()
                            .expect("poisoned index mutex")
                            .blobs
                            .push(BlobInfo {
                                start: frame.start,
                                size: frame.size,
                                groups: Vec::new(),
                            });
                    }
                }
            }
        }

        let worker_count = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let (tx, rx) = bounded::<Envelope>(self.config.queue_size.max(1));
        let outstanding = Outstanding::default();
        let first_error: Mutex<Option<PbfError>> = Mutex::new(None);
        let abort = AtomicBool::new(false);

        let reader = &mut self.frame;
        let triggers = self.triggers.as_slice();

        thread::scope(|scope| {
            let outstanding = &outstanding;
            let first_error = &first_error;
            let abort = &abort;

            for _ in 0..worker_count {
                let rx = rx.clone();
                scope.spawn(move || {
                    while let Ok(envelope) = rx.recv() {
                        let result = process_envelope(envelope, index, sink);
                        outstanding.decrement();
                        if let Err(err) = result {
                            record_error(first_error, err);
                            abort.store(true, Ordering::Relaxed);
                            outstanding.interrupt();
                            break;
                        }
                    }
                });
            }
            drop(rx);

            // Feeder: the single owner of the byte source.
            loop {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let frame = match reader.read_blob() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => {
                        record_error(first_error, err);
                        break;
                    }
                };

                let blob_no = if indexing {
                    let mut guard = index.lock().expect("poisoned index mutex");
                    guard.blobs.push(BlobInfo {
                        start: frame.start,
                        size: frame.size,
                        groups: Vec::new(),
                    });
                    Some(guard.blobs.len() - 1)
                } else {
                    None
                };

                outstanding.increment();
                if tx
                    .send(Envelope {
                        blob_no,
                        blob: frame.blob,
                    })
                    .is_err()
                {
                    // All workers exited; their error is already recorded.
                    break;
                }

                let position = reader.bytes_read();
                for (breakpoint_no, &offset) in breakpoints.iter().enumerate() {
                    if position == offset {
                        debug!("waiting at breakpoint {} (offset {})", breakpoint_no, offset);
                        outstanding.wait_until_drained(abort);
                        if abort.load(Ordering::Relaxed) {
                            break;
                        }
                        for trigger in triggers {
                            trigger(breakpoint_no, offset);
                        }
                        break;
                    }
                }
            }
            drop(tx);
        });

        match first_error.into_inner().expect("poisoned error slot") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn autoload_index(&mut self) -> Result<()> {
        let Some(path) = self.index_path.as_ref() else {
            return Ok(());
        };
        if self.index.is_some() || !path.exists() {
            return Ok(());
        }
        info!("autoloading index from {}", path.display());
        self.index = Some(BlobIndex::read_from_file(path)?);
        Ok(())
    }
}

/// Decode one blob end to end: decompress, expand groups into the sink,
/// and attach group summaries to the owning index record.
fn process_envelope<S: ElementSink + ?Sized>(
    envelope: Envelope,
    index: &Mutex<BlobIndex>,
    sink: &S,
) -> Result<()> {
    let decoded = blob::decode_primitive_block(&envelope.blob)?;
    let summaries = block::decode_block(&decoded, sink)?;
    if let Some(blob_no) = envelope.blob_no {
        if !summaries.is_empty() {
            let mut guard = index.lock().expect("poisoned index mutex");
            guard.blobs[blob_no].groups = summaries;
        }
    }
    Ok(())
}

fn verify_osm_header(frame: &frame::Frame) -> Result<()> {
    if frame.header.r#type != "OSMHeader" {
        return Err(PbfError::Format(format!(
            "invalid first blob: expected OSMHeader, have {:?}",
            frame.header.r#type
        )));
    }
    let bytes = blob::payload(&frame.blob)?;
    let header_block = proto::HeaderBlock::decode(bytes.as_slice())?;
    for feature in &header_block.required_features {
        if !KNOWN_REQUIRED_FEATURES.contains(&feature.as_str()) {
            return Err(PbfError::UnsupportedFeature(format!(
                "required header feature {:?}",
                feature
            )));
        }
    }
    if let Some(bbox) = &header_block.bbox {
        debug!(
            "header bbox: left={} right={} top={} bottom={}",
            bbox.left, bbox.right, bbox.top, bbox.bottom
        );
    }
    Ok(())
}

/// Record the first error of the run; later ones are dropped.
fn record_error(slot: &Mutex<Option<PbfError>>, err: PbfError) {
    let mut guard = slot.lock().expect("poisoned error slot");
    if guard.is_none() {
        *guard = Some(err);
    } else {
        debug!("suppressing subsequent error: {}", err);
    }
}

/// Count of blobs enqueued but not yet fully decoded. The feeder blocks
/// on this reaching zero at breakpoints.
#[derive(Default)]
struct Outstanding {
    count: Mutex<u64>,
    drained: Condvar,
}

impl Outstanding {
    fn increment(&self) {
        *self.count.lock().expect("poisoned blob counter") += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().expect("poisoned blob counter");
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Wake the feeder after an abort so it never waits on blobs that
    /// no longer have workers to decode them.
    fn interrupt(&self) {
        let _guard = self.count.lock().expect("poisoned blob counter");
        self.drained.notify_all();
    }

    fn wait_until_drained(&self, abort: &AtomicBool) {
        let mut count = self.count.lock().expect("poisoned blob counter");
        while *count > 0 && !abort.load(Ordering::Relaxed) {
            count = self.drained.wait(count).expect("poisoned blob counter");
        }
    }
}

fn sibling_index_path(path: &Path) -> PathBuf {
    let mut buf = path.as_os_str().to_os_string();
    buf.push(".idx");
    PathBuf::from(buf)
}
