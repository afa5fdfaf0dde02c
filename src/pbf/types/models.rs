//! Core data structures for decoded OSM elements.
//!
//! This module defines the types delivered to consumers:
//! - Decoded elements (nodes, ways, relations) and their tags
//! - The [`ElementSink`] consumer interface
//! - The element type enumeration shared with the blob index
//! - The decoder [`Config`] record

use std::collections::HashMap;
use std::fmt;

use super::error::{PbfError, Result};

/// Key/value tags attached to an element.
pub type Tags = HashMap<String, String>;

/// The three OSM element kinds.
///
/// Used both for relation members and for per-group summaries in the
/// blob index, where its stable string form (`"node"`, `"way"`,
/// `"relation"`) appears in lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    /// Single-byte code used by the index serialization.
    pub(crate) fn code(self) -> u8 {
        match self {
            ElementType::Node => 0,
            ElementType::Way => 1,
            ElementType::Relation => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ElementType::Node),
            1 => Ok(ElementType::Way),
            2 => Ok(ElementType::Relation),
            _ => Err(PbfError::Format(format!(
                "unknown element type code: {}",
                code
            ))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElementType::Node => write!(f, "node"),
            ElementType::Way => write!(f, "way"),
            ElementType::Relation => write!(f, "relation"),
        }
    }
}

/// A decoded OSM node with resolved coordinates.
///
/// Coordinates are in degrees, computed from the raw fixed-point values
/// with the granularity and offsets of the enclosing block.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
}

/// A decoded OSM way: an ordered list of node ids plus tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    /// Referenced node ids, in file order, after delta decoding.
    pub refs: Vec<i64>,
    pub tags: Tags,
}

/// A single member of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: i64,
    pub member_type: ElementType,
    pub role: String,
}

/// A decoded OSM relation: an ordered member list plus tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

/// Consumer interface for the element stream.
///
/// During [`Decoder::parse`](crate::Decoder::parse) these methods are
/// invoked from worker threads; implementations must be `Sync` and are
/// responsible for their own interior synchronization. Within a single
/// blob, elements arrive in file order; across blobs, ordering is only
/// guaranteed at breakpoints.
pub trait ElementSink {
    fn on_node(&self, node: Node);
    fn on_way(&self, way: Way);
    fn on_relation(&self, relation: Relation);
}

/// Decoder configuration.
///
/// Replaces process-wide feature flags: the only behavioral switch is
/// `indexing`, which controls whether per-group summaries are accumulated
/// during parsing and whether the index is autosaved on success.
#[derive(Debug, Clone)]
pub struct Config {
    /// Build a blob index while parsing and autosave it afterwards.
    pub indexing: bool,
    /// Bound on the feeder→worker queue. A larger queue consumes more
    /// memory but may keep workers busier.
    pub queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            indexing: false,
            queue_size: 64,
        }
    }
}
