//! Shared fixtures: synthetic PBF streams built with the same protobuf
//! bindings the reader decodes with, plus a recording sink.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;

use pbf_reader::pbf::proto;
use pbf_reader::{ElementSink, Node, Relation, Way};

/// Frame a blob: 4-byte big-endian header length, BlobHeader, Blob.
pub fn frame(blob_type: &str, blob: &proto::Blob) -> Vec<u8> {
    let blob_bytes = blob.encode_to_vec();
    let header = proto::BlobHeader {
        r#type: blob_type.to_string(),
        indexdata: None,
        datasize: blob_bytes.len() as i32,
    };
    let header_bytes = header.encode_to_vec();
    let mut out = Vec::new();
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&blob_bytes);
    out
}

pub fn empty_blob() -> proto::Blob {
    proto::Blob {
        raw: None,
        raw_size: None,
        zlib_data: None,
        lzma_data: None,
        obsolete_bzip2_data: None,
    }
}

pub fn raw_blob(payload: Vec<u8>) -> proto::Blob {
    proto::Blob {
        raw_size: Some(payload.len() as i32),
        raw: Some(payload),
        ..empty_blob()
    }
}

pub fn zlib_blob(payload: &[u8]) -> proto::Blob {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    proto::Blob {
        raw_size: Some(payload.len() as i32),
        zlib_data: Some(encoder.finish().unwrap()),
        ..empty_blob()
    }
}

/// A framed `OSMHeader` blob with the standard required features.
pub fn header_frame() -> Vec<u8> {
    let header_block = proto::HeaderBlock {
        bbox: None,
        required_features: vec!["OsmSchema-V0.6".to_string(), "DenseNodes".to_string()],
        optional_features: Vec::new(),
        writingprogram: Some("pbf-reader tests".to_string()),
        source: None,
    };
    frame("OSMHeader", &raw_blob(header_block.encode_to_vec()))
}

pub fn block_with(strings: &[&str], groups: Vec<proto::PrimitiveGroup>) -> proto::PrimitiveBlock {
    proto::PrimitiveBlock {
        stringtable: proto::StringTable {
            s: strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
        },
        primitivegroup: groups,
        granularity: None,
        date_granularity: None,
        lat_offset: None,
        lon_offset: None,
    }
}

pub fn empty_group() -> proto::PrimitiveGroup {
    proto::PrimitiveGroup {
        nodes: Vec::new(),
        dense: None,
        ways: Vec::new(),
        relations: Vec::new(),
    }
}

/// A block with one dense group; ids/lats/lons are given delta-coded.
pub fn dense_node_block(ids: &[i64], lats: &[i64], lons: &[i64]) -> proto::PrimitiveBlock {
    let mut group = empty_group();
    group.dense = Some(proto::DenseNodes {
        id: ids.to_vec(),
        denseinfo: None,
        lat: lats.to_vec(),
        lon: lons.to_vec(),
        keys_vals: Vec::new(),
    });
    block_with(&[""], vec![group])
}

/// A block with one way of the given id and delta-coded refs.
pub fn way_block(id: i64, ref_deltas: &[i64]) -> proto::PrimitiveBlock {
    let mut group = empty_group();
    group.ways = vec![proto::Way {
        id,
        keys: Vec::new(),
        vals: Vec::new(),
        info: None,
        refs: ref_deltas.to_vec(),
    }];
    block_with(&[""], vec![group])
}

/// A block with one relation holding a single node member.
pub fn relation_block(id: i64, member_id: i64) -> proto::PrimitiveBlock {
    let mut group = empty_group();
    group.relations = vec![proto::Relation {
        id,
        keys: Vec::new(),
        vals: Vec::new(),
        info: None,
        roles_sid: vec![0],
        memids: vec![member_id],
        types: vec![0],
    }];
    block_with(&[""], vec![group])
}

/// One event per sink callback or trigger firing, in real-time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Node(i64),
    Way(i64),
    Relation(i64),
    Trigger(usize, u64),
}

/// Sink that records full elements plus an ordered event log shared with
/// breakpoint triggers.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Event>>,
    pub nodes: Mutex<Vec<Node>>,
}

impl RecordingSink {
    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ElementSink for RecordingSink {
    fn on_node(&self, node: Node) {
        self.push(Event::Node(node.id));
        self.nodes.lock().unwrap().push(node);
    }

    fn on_way(&self, way: Way) {
        self.push(Event::Way(way.id));
    }

    fn on_relation(&self, relation: Relation) {
        self.push(Event::Relation(relation.id));
    }
}

/// Process-unique scratch path; callers clean up what they create.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pbf-reader-test-{}-{}", std::process::id(), name))
}
