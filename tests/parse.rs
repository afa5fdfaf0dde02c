//! Whole-pipeline scenarios: framing, parallel decode, breakpoint
//! synchronization, and index persistence against synthetic PBF streams.

mod common;

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use prost::Message;

use common::{
    block_with, dense_node_block, empty_blob, frame, header_frame, raw_blob, relation_block,
    temp_path, way_block, zlib_blob, Event, RecordingSink,
};
use pbf_reader::pbf::proto;
use pbf_reader::{Config, Decoder, ElementType, GroupInfo, PbfError};

fn indexing_config() -> Config {
    Config {
        indexing: true,
        ..Config::default()
    }
}

/// A header frame followed by one raw data frame per block.
fn stream_of(blocks: &[proto::PrimitiveBlock]) -> Vec<u8> {
    let mut bytes = header_frame();
    for block in blocks {
        bytes.extend_from_slice(&frame("OSMData", &raw_blob(block.encode_to_vec())));
    }
    bytes
}

#[test]
fn empty_input_is_a_clean_end_of_stream() {
    let mut decoder = Decoder::new(Cursor::new(Vec::new()));
    let sink = RecordingSink::default();

    decoder.parse(&sink, false).unwrap();

    assert!(sink.events().is_empty());
    let index = decoder.index().unwrap();
    assert!(index.blobs.is_empty());
    assert!(index.breakpoints.is_empty());
}

#[test]
fn header_only_file_indexes_one_blob_without_groups() {
    let bytes = header_frame();
    let total = bytes.len() as u64;

    let mut decoder = Decoder::new(Cursor::new(bytes));
    decoder.set_config(indexing_config());
    let sink = RecordingSink::default();

    decoder.parse(&sink, false).unwrap();

    assert!(sink.events().is_empty());
    let index = decoder.index().unwrap();
    assert_eq!(index.blobs.len(), 1);
    assert_eq!(index.blobs[0].start, 0);
    assert_eq!(index.blobs[0].size, total);
    assert!(index.blobs[0].groups.is_empty());
}

#[test]
fn dense_blob_streams_nodes_in_file_order() {
    let block = dense_node_block(&[10, 2, 3], &[100, 10, -20], &[50, 0, 5]);
    let mut bytes = header_frame();
    bytes.extend_from_slice(&frame("OSMData", &zlib_blob(&block.encode_to_vec())));
    let total = bytes.len() as u64;

    let mut decoder = Decoder::new(Cursor::new(bytes));
    decoder.set_config(indexing_config());
    let sink = RecordingSink::default();

    decoder.parse(&sink, false).unwrap();

    assert_eq!(
        sink.events(),
        vec![Event::Node(10), Event::Node(12), Event::Node(15)]
    );
    {
        let nodes = sink.nodes.lock().unwrap();
        // Running lat sums are 100, 110, 90 at the default granularity of
        // 100 nanodegrees per unit.
        assert!((nodes[0].lat - 100e-7).abs() < 1e-12);
        assert!((nodes[2].lat - 90e-7).abs() < 1e-12);
        assert!((nodes[2].lon - 55e-7).abs() < 1e-12);
    }

    let index = decoder.index().unwrap();
    assert_eq!(index.blobs.len(), 2);
    assert_eq!(
        index.blobs[1].groups,
        vec![GroupInfo {
            element_type: ElementType::Node,
            count: 3,
            low: 10,
            high: 15,
        }]
    );
    // Indexed ranges tile the input exactly.
    assert_eq!(index.blobs[0].start + index.blobs[0].size, index.blobs[1].start);
    assert_eq!(index.blobs[1].start + index.blobs[1].size, total);
}

#[test]
fn breakpoints_quiesce_between_element_types() {
    let node_frame = frame(
        "OSMData",
        &raw_blob(dense_node_block(&[10, 2, 3], &[0, 0, 0], &[0, 0, 0]).encode_to_vec()),
    );
    let way_frame = frame(
        "OSMData",
        &raw_blob(way_block(40, &[10, 2, 3]).encode_to_vec()),
    );
    let relation_frame = frame("OSMData", &raw_blob(relation_block(77, 10).encode_to_vec()));

    let mut bytes = header_frame();
    let way_start = (bytes.len() + node_frame.len()) as u64;
    let relation_start = way_start + way_frame.len() as u64;
    bytes.extend_from_slice(&node_frame);
    bytes.extend_from_slice(&way_frame);
    bytes.extend_from_slice(&relation_frame);

    // First pass builds the index; breakpoints mark the type transitions.
    let mut decoder = Decoder::new(Cursor::new(bytes.clone()));
    decoder.set_config(indexing_config());
    decoder.parse(&RecordingSink::default(), false).unwrap();
    let mut index = decoder.take_index().unwrap();
    index.set_breakpoints();
    assert_eq!(index.breakpoints, vec![way_start, relation_start]);

    // Second pass with the index installed pauses at each breakpoint.
    let sink = Arc::new(RecordingSink::default());
    let mut decoder = Decoder::new(Cursor::new(bytes));
    decoder.set_index(index);
    let trigger_sink = Arc::clone(&sink);
    decoder.register_trigger(move |breakpoint_no, offset| {
        trigger_sink.push(Event::Trigger(breakpoint_no, offset));
    });
    decoder.parse(sink.as_ref(), false).unwrap();

    let events = sink.events();
    let position = |wanted: &Event| events.iter().position(|e| e == wanted).unwrap();
    let trigger0 = position(&Event::Trigger(0, way_start));
    let trigger1 = position(&Event::Trigger(1, relation_start));

    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Trigger(..)))
            .count(),
        2
    );
    for node in [Event::Node(10), Event::Node(12), Event::Node(15)] {
        assert!(position(&node) < trigger0, "{:?} after trigger 0", node);
    }
    let way = position(&Event::Way(40));
    assert!(trigger0 < way && way < trigger1);
    assert!(trigger1 < position(&Event::Relation(77)));
}

#[test]
fn corrupted_zlib_fails_parse_and_skips_autosave() {
    let mut bytes = header_frame();
    let corrupt = proto::Blob {
        zlib_data: Some(vec![0xde, 0xad, 0xbe, 0xef]),
        raw_size: Some(64),
        ..empty_blob()
    };
    bytes.extend_from_slice(&frame("OSMData", &corrupt));

    let path = temp_path("corrupt.osm.pbf");
    fs::write(&path, &bytes).unwrap();
    let index_path = temp_path("corrupt.osm.pbf.idx");

    let mut decoder = Decoder::from_path(&path).unwrap();
    decoder.set_config(indexing_config());
    let result = decoder.parse(&RecordingSink::default(), false);

    assert!(matches!(result, Err(PbfError::Format(_))));
    assert!(!index_path.exists());

    fs::remove_file(&path).unwrap();
}

#[test]
fn index_round_trips_through_autosave_and_autoload() {
    let bytes = stream_of(&[
        dense_node_block(&[10, 2, 3], &[0, 0, 0], &[0, 0, 0]),
        way_block(40, &[10, 2, 3]),
        relation_block(77, 10),
    ]);
    let path = temp_path("roundtrip.osm.pbf");
    fs::write(&path, &bytes).unwrap();
    let index_path = temp_path("roundtrip.osm.pbf.idx");

    // Indexed parse autosaves a sibling .idx file.
    let mut decoder = Decoder::from_path(&path).unwrap();
    decoder.set_config(indexing_config());
    decoder.parse(&RecordingSink::default(), false).unwrap();
    let built = decoder.index().unwrap().clone();
    assert!(index_path.exists());

    // A fresh decoder over the same input autoloads an equal index, with
    // breakpoints recomputed by the load.
    let mut reopened = Decoder::from_path(&path).unwrap();
    let loaded = reopened.index().unwrap().clone();
    assert_eq!(loaded.blobs, built.blobs);
    let way_start = loaded.first_offset_of_type(ElementType::Way).unwrap();
    let relation_start = loaded.first_offset_of_type(ElementType::Relation).unwrap();
    assert_eq!(loaded.breakpoints, vec![way_start, relation_start]);

    // Lookup agrees with a full re-parse of the same bytes.
    let mut fresh = Decoder::new(Cursor::new(bytes));
    fresh.set_config(indexing_config());
    fresh.parse(&RecordingSink::default(), false).unwrap();
    assert_eq!(
        loaded.blob_offsets(ElementType::Way, 40).unwrap(),
        fresh
            .index()
            .unwrap()
            .blob_offsets(ElementType::Way, 40)
            .unwrap()
    );

    // Probing the candidate offset yields exactly the sought element.
    let offsets = loaded.blob_offsets(ElementType::Way, 40).unwrap();
    assert_eq!(offsets, vec![way_start]);
    let sink = RecordingSink::default();
    reopened.parse_blob(&sink, offsets[0]).unwrap();
    assert_eq!(sink.events(), vec![Event::Way(40)]);

    fs::remove_file(&path).unwrap();
    fs::remove_file(&index_path).unwrap();
}

#[test]
fn first_blob_must_be_an_osm_header() {
    let block = dense_node_block(&[1], &[0], &[0]);
    let bytes = frame("OSMData", &raw_blob(block.encode_to_vec()));

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let result = decoder.parse(&RecordingSink::default(), false);
    assert!(matches!(result, Err(PbfError::Format(_))));
}

#[test]
fn unknown_required_header_feature_is_rejected() {
    let header_block = proto::HeaderBlock {
        bbox: None,
        required_features: vec!["OsmSchema-V0.6".to_string(), "HistoricalInformation".to_string()],
        optional_features: Vec::new(),
        writingprogram: None,
        source: None,
    };
    let bytes = frame("OSMHeader", &raw_blob(header_block.encode_to_vec()));

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let result = decoder.parse(&RecordingSink::default(), false);
    assert!(matches!(result, Err(PbfError::UnsupportedFeature(_))));
}

#[test]
fn skip_header_check_parses_a_headerless_stream() {
    let block = dense_node_block(&[5], &[0], &[0]);
    let bytes = frame("OSMData", &raw_blob(block.encode_to_vec()));

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let sink = RecordingSink::default();
    decoder.parse(&sink, true).unwrap();
    assert_eq!(sink.events(), vec![Event::Node(5)]);
}

#[test]
fn parse_blob_at_end_of_stream_is_clean() {
    let bytes = header_frame();
    let end = bytes.len() as u64;
    let mut decoder = Decoder::new(Cursor::new(bytes));
    let sink = RecordingSink::default();
    decoder.parse_blob(&sink, end).unwrap();
    assert!(sink.events().is_empty());
}

#[test]
fn legacy_node_groups_surface_unsupported_feature() {
    let mut group = common::empty_group();
    group.nodes = vec![proto::Node {
        id: 1,
        keys: Vec::new(),
        vals: Vec::new(),
        info: None,
        lat: 0,
        lon: 0,
    }];
    let bytes = stream_of(&[block_with(&[""], vec![group])]);

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let result = decoder.parse(&RecordingSink::default(), false);
    assert!(matches!(result, Err(PbfError::UnsupportedFeature(_))));
}
