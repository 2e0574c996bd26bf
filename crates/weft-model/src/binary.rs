//! Binary model format (`.weftb`) — the artifact the runtime consumes.
//!
//! Two variants, all integers little-endian:
//!
//! **Simple** (fixed 16-byte node records):
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ u32 node_count │ u32 payload_len             │
//! ├──────────────────────────────────────────────┤
//! │ node_count × 16-byte records:                │
//! │   u16 id │ u8 opcode │ u16 in │ u16 out      │
//! │   u32 flags │ u8 topo_len │ 2 × u16 topo     │
//! ├──────────────────────────────────────────────┤
//! │ payload bytes                                │
//! │ zero padding to 32-byte file alignment       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! **Versioned** (variable-length records, topology of any length):
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ u32 version=1 │ u32 node_count               │
//! │ u32 payload_len │ u32 flags                  │
//! ├──────────────────────────────────────────────┤
//! │ per node: u16 id │ u8 opcode │ u16 in        │
//! │   u16 out │ u32 flags │ u16 topo_len         │
//! │   topo_len × u16, zero-padded to 8 bytes     │
//! ├──────────────────────────────────────────────┤
//! │ payload bytes, padded to 32-byte alignment   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A record's unused simple-variant topology slot is zero-filled, so a
//! node with no dependencies ends in plain zero padding.

use crate::graph::{Graph, Node, Topology, TOPO_SENTINEL};
use weft_core::{align_up_32, Result, WeftError};

/// Accepted versioned-format version.
pub const VERSION: u32 = 1;

/// Simple-variant header length in bytes.
pub const SIMPLE_HEADER_LEN: usize = 8;

/// Fixed simple-variant node record length in bytes.
pub const NODE_RECORD_LEN: usize = 16;

/// Versioned-variant header length in bytes.
pub const VERSIONED_HEADER_LEN: usize = 16;

/// Maximum dependencies a simple-variant record can carry.
pub const SIMPLE_MAX_TOPO: usize = 2;

/// Which on-disk layout a buffer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Simple,
    Versioned,
}

/// Guess the variant of `data`.
///
/// A simple header cannot be told from a versioned one by inspection alone
/// (a one-node simple file also starts with a leading 1), so the heuristic
/// is size accounting: if the buffer length matches the simple layout
/// implied by the first two words, it is simple; otherwise a leading
/// `VERSION` word selects the versioned parse. Callers that know the
/// variant should use [`read_with`] and skip the guess.
pub fn detect(data: &[u8]) -> Variant {
    if data.len() < SIMPLE_HEADER_LEN {
        return Variant::Simple;
    }
    let first = read_u32(data, 0) as usize;
    let second = read_u32(data, 4) as usize;

    let simple_total = first
        .checked_mul(NODE_RECORD_LEN)
        .and_then(|n| n.checked_add(SIMPLE_HEADER_LEN))
        .and_then(|n| n.checked_add(second))
        .map(align_up_32);
    if simple_total == Some(data.len()) {
        return Variant::Simple;
    }
    if first as u32 == VERSION {
        return Variant::Versioned;
    }
    Variant::Simple
}

/// Parse a model buffer, guessing the variant.
pub fn read(data: &[u8]) -> Result<Graph> {
    read_with(data, detect(data))
}

/// Parse a model buffer with a caller-declared variant.
pub fn read_with(data: &[u8], variant: Variant) -> Result<Graph> {
    match variant {
        Variant::Simple => read_simple(data),
        Variant::Versioned => read_versioned(data),
    }
}

/// Serialize a graph. The simple variant rejects nodes with more than
/// [`SIMPLE_MAX_TOPO`] dependencies; the versioned variant holds any graph.
pub fn write(graph: &Graph, variant: Variant) -> Result<Vec<u8>> {
    match variant {
        Variant::Simple => write_simple(graph),
        Variant::Versioned => Ok(write_versioned(graph)),
    }
}

/// The narrowest variant able to represent `graph`.
pub fn preferred_variant(graph: &Graph) -> Variant {
    let fits_simple = graph
        .nodes
        .iter()
        .all(|n| n.dependencies().count() <= SIMPLE_MAX_TOPO);
    if fits_simple {
        Variant::Simple
    } else {
        Variant::Versioned
    }
}

fn read_simple(data: &[u8]) -> Result<Graph> {
    if data.len() < SIMPLE_HEADER_LEN {
        return Err(WeftError::InvalidFormat(format!(
            "file of {} bytes is shorter than the {}-byte header",
            data.len(),
            SIMPLE_HEADER_LEN
        )));
    }
    let node_count = read_u32(data, 0) as usize;
    let payload_len = read_u32(data, 4) as usize;

    let nodes_end = node_count
        .checked_mul(NODE_RECORD_LEN)
        .and_then(|n| n.checked_add(SIMPLE_HEADER_LEN))
        .ok_or_else(|| WeftError::InvalidFormat("node count overflows".into()))?;
    let payload_end = nodes_end
        .checked_add(payload_len)
        .ok_or_else(|| WeftError::InvalidFormat("payload length overflows".into()))?;
    if payload_end > data.len() {
        return Err(WeftError::InvalidFormat(format!(
            "{} nodes + {} payload bytes need {} bytes, file has {}",
            node_count,
            payload_len,
            payload_end,
            data.len()
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        let rec = &data[SIMPLE_HEADER_LEN + i * NODE_RECORD_LEN..];
        let topo_len = rec[11] as usize;
        if topo_len > SIMPLE_MAX_TOPO {
            return Err(WeftError::InvalidFormat(format!(
                "record {} declares {} topology entries, the simple format holds {}",
                i, topo_len, SIMPLE_MAX_TOPO
            )));
        }
        let mut topology = Topology::new();
        for t in 0..topo_len {
            let entry = read_u16(rec, 12 + t * 2);
            if entry != TOPO_SENTINEL {
                topology.push(entry);
            }
        }
        nodes.push(Node {
            id: read_u16(rec, 0),
            opcode: rec[2],
            in_off: read_u16(rec, 3),
            out_off: read_u16(rec, 5),
            flags: read_u32(rec, 7),
            topology,
        });
    }

    let payload = data[nodes_end..payload_end].to_vec();
    Ok(Graph { nodes, payload })
}

fn write_simple(graph: &Graph) -> Result<Vec<u8>> {
    let total = SIMPLE_HEADER_LEN + graph.nodes.len() * NODE_RECORD_LEN + graph.payload.len();
    let mut buf = Vec::with_capacity(align_up_32(total));

    buf.extend_from_slice(&(graph.nodes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(graph.payload.len() as u32).to_le_bytes());

    for node in &graph.nodes {
        let deps: Vec<u16> = node.dependencies().collect();
        if deps.len() > SIMPLE_MAX_TOPO {
            return Err(WeftError::InvalidFormat(format!(
                "node {} has {} dependencies, the simple format holds {}; use the versioned variant",
                node.id,
                deps.len(),
                SIMPLE_MAX_TOPO
            )));
        }
        buf.extend_from_slice(&node.id.to_le_bytes());
        buf.push(node.opcode);
        buf.extend_from_slice(&node.in_off.to_le_bytes());
        buf.extend_from_slice(&node.out_off.to_le_bytes());
        buf.extend_from_slice(&node.flags.to_le_bytes());
        buf.push(deps.len() as u8);
        for slot in 0..SIMPLE_MAX_TOPO {
            let entry = deps.get(slot).copied().unwrap_or(0);
            buf.extend_from_slice(&entry.to_le_bytes());
        }
    }

    buf.extend_from_slice(&graph.payload);
    pad_to_32(&mut buf);
    Ok(buf)
}

fn read_versioned(data: &[u8]) -> Result<Graph> {
    if data.len() < VERSIONED_HEADER_LEN {
        return Err(WeftError::InvalidFormat(format!(
            "file of {} bytes is shorter than the {}-byte versioned header",
            data.len(),
            VERSIONED_HEADER_LEN
        )));
    }
    let version = read_u32(data, 0);
    if version != VERSION {
        return Err(WeftError::UnsupportedVersion(version));
    }
    let node_count = read_u32(data, 4) as usize;
    let payload_len = read_u32(data, 8) as usize;
    // Header flags word is reserved; nothing reads it yet.

    let mut pos = VERSIONED_HEADER_LEN;
    let mut nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        if pos + 13 > data.len() {
            return Err(WeftError::InvalidFormat(format!(
                "truncated inside record {} at offset {}",
                i, pos
            )));
        }
        let rec = &data[pos..];
        let topo_len = read_u16(rec, 11) as usize;
        let body = 13 + topo_len * 2;
        let record_len = (body + 7) & !7;
        if pos + record_len > data.len() {
            return Err(WeftError::InvalidFormat(format!(
                "record {} topology of {} entries runs past end of file",
                i, topo_len
            )));
        }

        let mut topology = Topology::new();
        for t in 0..topo_len {
            let entry = read_u16(rec, 13 + t * 2);
            if entry != TOPO_SENTINEL {
                topology.push(entry);
            }
        }
        nodes.push(Node {
            id: read_u16(rec, 0),
            opcode: rec[2],
            in_off: read_u16(rec, 3),
            out_off: read_u16(rec, 5),
            flags: read_u32(rec, 7),
            topology,
        });
        pos += record_len;
    }

    let payload_end = pos
        .checked_add(payload_len)
        .ok_or_else(|| WeftError::InvalidFormat("payload length overflows".into()))?;
    if payload_end > data.len() {
        return Err(WeftError::InvalidFormat(format!(
            "payload of {} bytes at offset {} runs past end of file",
            payload_len, pos
        )));
    }
    let payload = data[pos..payload_end].to_vec();
    Ok(Graph { nodes, payload })
}

fn write_versioned(graph: &Graph) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(graph.nodes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(graph.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());

    for node in &graph.nodes {
        let deps: Vec<u16> = node.dependencies().collect();
        buf.extend_from_slice(&node.id.to_le_bytes());
        buf.push(node.opcode);
        buf.extend_from_slice(&node.in_off.to_le_bytes());
        buf.extend_from_slice(&node.out_off.to_le_bytes());
        buf.extend_from_slice(&node.flags.to_le_bytes());
        buf.extend_from_slice(&(deps.len() as u16).to_le_bytes());
        for dep in &deps {
            buf.extend_from_slice(&dep.to_le_bytes());
        }
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
    }

    buf.extend_from_slice(&graph.payload);
    pad_to_32(&mut buf);
    buf
}

fn pad_to_32(buf: &mut Vec<u8>) {
    buf.resize(align_up_32(buf.len()), 0);
}

#[inline]
fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

#[inline]
fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
