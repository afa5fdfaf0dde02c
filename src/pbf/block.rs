//! Primitive-group decoding.
//!
//! Expands the delta-coded columns of a [`proto::PrimitiveBlock`] into
//! element callbacks on the sink, in file order. The same pass that
//! accumulates ids also folds min/max into a per-group summary for the
//! blob index; callers not building an index simply discard the
//! summaries.

use super::index::GroupInfo;
use super::proto;
use super::types::error::{PbfError, Result};
use super::types::models::{ElementSink, ElementType, Member, Node, Relation, Tags, Way};

/// Decode every primitive group of `block`, emitting elements to `sink`.
///
/// Returns one [`GroupInfo`] per non-empty group, in file order. Groups
/// with a payload kind this reader does not handle fail with
/// [`PbfError::UnsupportedFeature`] (legacy nodes) or
/// [`PbfError::Format`] (nothing recognized).
pub(crate) fn decode_block<S: ElementSink + ?Sized>(
    block: &proto::PrimitiveBlock,
    sink: &S,
) -> Result<Vec<GroupInfo>> {
    let mut summaries = Vec::new();
    for group in &block.primitivegroup {
        let summary = if let Some(dense) = &group.dense {
            decode_dense(block, dense, sink)?
        } else if !group.ways.is_empty() {
            decode_ways(block, &group.ways, sink)?
        } else if !group.relations.is_empty() {
            decode_relations(block, &group.relations, sink)?
        } else if !group.nodes.is_empty() {
            return Err(PbfError::UnsupportedFeature(
                "non-dense node groups".to_string(),
            ));
        } else {
            return Err(PbfError::Format(
                "primitive group carries no recognized payload".to_string(),
            ));
        };
        if let Some(summary) = summary {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}

fn decode_dense<S: ElementSink + ?Sized>(
    block: &proto::PrimitiveBlock,
    dense: &proto::DenseNodes,
    sink: &S,
) -> Result<Option<GroupInfo>> {
    if dense.id.len() != dense.lat.len() || dense.id.len() != dense.lon.len() {
        return Err(PbfError::Format(format!(
            "dense node column lengths differ: {} ids, {} lats, {} lons",
            dense.id.len(),
            dense.lat.len(),
            dense.lon.len()
        )));
    }

    let granularity = i64::from(block.granularity());
    let lat_offset = block.lat_offset();
    let lon_offset = block.lon_offset();

    let mut id: i64 = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;
    let mut range = IdRange::new(ElementType::Node);
    // Cursor into the flat zero-terminated (key, val) pair stream.
    let mut kv = dense.keys_vals.iter();

    for k in 0..dense.id.len() {
        id += dense.id[k];
        lat += dense.lat[k];
        lon += dense.lon[k];
        range.record(id);

        let mut tags = Tags::new();
        if !dense.keys_vals.is_empty() {
            loop {
                let key = match kv.next() {
                    Some(&0) => break,
                    Some(&key) => key,
                    None => {
                        return Err(PbfError::Format(
                            "dense keys_vals exhausted before last node".to_string(),
                        ))
                    }
                };
                let val = *kv.next().ok_or_else(|| {
                    PbfError::Format("dense keys_vals ends inside a pair".to_string())
                })?;
                tags.insert(
                    str_at(block, i64::from(key))?,
                    str_at(block, i64::from(val))?,
                );
            }
        }

        sink.on_node(Node {
            id,
            lat: 1e-9 * (lat_offset + granularity * lat) as f64,
            lon: 1e-9 * (lon_offset + granularity * lon) as f64,
            tags,
        });
    }
    Ok(range.finish())
}

fn decode_ways<S: ElementSink + ?Sized>(
    block: &proto::PrimitiveBlock,
    ways: &[proto::Way],
    sink: &S,
) -> Result<Option<GroupInfo>> {
    let mut range = IdRange::new(ElementType::Way);
    for way in ways {
        range.record(way.id);

        let mut refs = Vec::with_capacity(way.refs.len());
        let mut node_id: i64 = 0;
        for delta in &way.refs {
            node_id += delta;
            refs.push(node_id);
        }

        sink.on_way(Way {
            id: way.id,
            refs,
            tags: tags_from(block, &way.keys, &way.vals)?,
        });
    }
    Ok(range.finish())
}

fn decode_relations<S: ElementSink + ?Sized>(
    block: &proto::PrimitiveBlock,
    relations: &[proto::Relation],
    sink: &S,
) -> Result<Option<GroupInfo>> {
    let mut range = IdRange::new(ElementType::Relation);
    for relation in relations {
        range.record(relation.id);

        if relation.memids.len() != relation.types.len()
            || relation.memids.len() != relation.roles_sid.len()
        {
            return Err(PbfError::Format(format!(
                "relation {} member column lengths differ",
                relation.id
            )));
        }

        let mut members = Vec::with_capacity(relation.memids.len());
        let mut member_id: i64 = 0;
        for k in 0..relation.memids.len() {
            member_id += relation.memids[k];
            let member_type = match relation.types[k] {
                0 => ElementType::Node,
                1 => ElementType::Way,
                2 => ElementType::Relation,
                other => {
                    return Err(PbfError::Format(format!(
                        "unknown relation member type: {}",
                        other
                    )))
                }
            };
            members.push(Member {
                id: member_id,
                member_type,
                role: str_at(block, i64::from(relation.roles_sid[k]))?,
            });
        }

        sink.on_relation(Relation {
            id: relation.id,
            members,
            tags: tags_from(block, &relation.keys, &relation.vals)?,
        });
    }
    Ok(range.finish())
}

/// Single-pass id range accumulator for a group summary.
struct IdRange {
    element_type: ElementType,
    count: u64,
    low: i64,
    high: i64,
}

impl IdRange {
    fn new(element_type: ElementType) -> Self {
        IdRange {
            element_type,
            count: 0,
            low: i64::MAX,
            high: i64::MIN,
        }
    }

    fn record(&mut self, id: i64) {
        self.count += 1;
        self.low = self.low.min(id);
        self.high = self.high.max(id);
    }

    /// Empty groups yield no summary.
    fn finish(self) -> Option<GroupInfo> {
        if self.count == 0 {
            return None;
        }
        Some(GroupInfo {
            element_type: self.element_type,
            count: self.count,
            low: self.low,
            high: self.high,
        })
    }
}

/// Look up a string-table entry, rejecting out-of-range indices.
fn str_at(block: &proto::PrimitiveBlock, index: i64) -> Result<String> {
    let entry = usize::try_from(index)
        .ok()
        .and_then(|i| block.stringtable.s.get(i))
        .ok_or_else(|| {
            PbfError::Format(format!(
                "string table index {} out of range ({} entries)",
                index,
                block.stringtable.s.len()
            ))
        })?;
    Ok(String::from_utf8_lossy(entry).into_owned())
}

fn tags_from(block: &proto::PrimitiveBlock, keys: &[u32], vals: &[u32]) -> Result<Tags> {
    if keys.len() != vals.len() {
        return Err(PbfError::Format(format!(
            "tag key/value column lengths differ: {} keys, {} vals",
            keys.len(),
            vals.len()
        )));
    }
    let mut tags = Tags::with_capacity(keys.len());
    for (&key, &val) in keys.iter().zip(vals) {
        tags.insert(str_at(block, i64::from(key))?, str_at(block, i64::from(val))?);
    }
    Ok(tags)
}
