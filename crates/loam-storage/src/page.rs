//! Slotted-page codec for B+Tree nodes.
//!
//! A page is a fixed-size byte region with a forward-growing pointer array
//! and a backward-growing cell heap, leaving a contiguous free region in the
//! middle:
//!
//! ```text
//! +------------------+ 0
//! | Page Header (16) |
//! +------------------+ 16
//! | Pointer Array    |
//! | [off:2, len:2]*n |  <- grows forward
//! +------------------+ free_start = 16 + 4*n
//! |    Free Space    |
//! +------------------+ free_end
//! | [rightmost: 4]   |  <- internal pages only
//! | Cell Heap        |
//! | cellN ... cell1  |  <- grows backward from the page end
//! +------------------+ page size
//! ```
//!
//! Each cell is (key_size:2, value_size:2, key, value). Internal pages encode
//! separator key plus 4-byte child page id in their cells and keep one extra
//! right-most child id immediately below `free_end`. All integers are
//! little-endian.

use crate::node::{Node, NodeType, Pair};
use bytes::Bytes;
use loam_common::{LoamError, Result};

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of one pointer-array entry (offset + length).
pub const POINTER_SIZE: usize = 4;

/// Size of the key-size/value-size prefix inside a cell.
pub const CELL_HEADER_SIZE: usize = 4;

/// Size of the right-most child reference stored in internal pages.
pub const RIGHT_MOST_REF_SIZE: usize = 4;

/// Page id of the root page. Page 0 is reserved and unused; the root never
/// moves off page 1.
pub const ROOT_PAGE_ID: u32 = 1;

/// Header at the start of every page.
///
/// Layout (16 bytes):
/// - page_id: 4 bytes
/// - free_start: 2 bytes (end of the pointer array)
/// - free_end: 2 bytes (start of the cell heap, right-most ref included)
/// - cell_count: 2 bytes
/// - type: 1 byte (bitset over ROOT/INTERNAL/LEAF)
/// - reserved: 5 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Page identifier.
    pub page_id: u32,
    /// Offset where the free region begins.
    pub free_start: u16,
    /// Offset where the free region ends.
    pub free_end: u16,
    /// Number of cells on this page.
    pub cell_count: u16,
    /// Node type bitset.
    pub node_type: NodeType,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = PAGE_HEADER_SIZE;

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.free_start.to_le_bytes());
        buf[6..8].copy_from_slice(&self.free_end.to_le_bytes());
        buf[8..10].copy_from_slice(&self.cell_count.to_le_bytes());
        buf[10] = self.node_type.bits();
        // bytes 11-15 are reserved (already zeroed)
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            free_start: u16::from_le_bytes([buf[4], buf[5]]),
            free_end: u16::from_le_bytes([buf[6], buf[7]]),
            cell_count: u16::from_le_bytes([buf[8], buf[9]]),
            node_type: NodeType::new(buf[10]),
        }
    }
}

fn corrupted(page_id: u32, reason: impl Into<String>) -> LoamError {
    LoamError::PageCorrupted {
        page_id,
        reason: reason.into(),
    }
}

/// Encodes `node` into `buf`, which must span exactly one page.
///
/// Pointers are written forward from the header while their cells are written
/// backward from the page end; internal nodes append the right-most child id
/// below the last cell.
pub fn encode_node(node: &Node, buf: &mut [u8]) -> Result<()> {
    let page_size = buf.len();
    buf.fill(0);

    let cell_count = node.pairs.len();
    let free_start = PAGE_HEADER_SIZE + cell_count * POINTER_SIZE;
    let mut end = page_size;

    for (i, pair) in node.pairs.iter().enumerate() {
        let cell_len = CELL_HEADER_SIZE + pair.key.len() + pair.value.len();
        end = end
            .checked_sub(cell_len)
            .filter(|end| *end >= free_start)
            .ok_or_else(|| corrupted(node.id, "node does not fit in page"))?;

        let ptr = PAGE_HEADER_SIZE + i * POINTER_SIZE;
        buf[ptr..ptr + 2].copy_from_slice(&(end as u16).to_le_bytes());
        buf[ptr + 2..ptr + 4].copy_from_slice(&(cell_len as u16).to_le_bytes());

        buf[end..end + 2].copy_from_slice(&(pair.key.len() as u16).to_le_bytes());
        buf[end + 2..end + 4].copy_from_slice(&(pair.value.len() as u16).to_le_bytes());
        let key_at = end + CELL_HEADER_SIZE;
        buf[key_at..key_at + pair.key.len()].copy_from_slice(&pair.key);
        let value_at = key_at + pair.key.len();
        buf[value_at..value_at + pair.value.len()].copy_from_slice(&pair.value);
    }

    if node.is_internal() {
        let right_most = *node
            .children
            .last()
            .ok_or_else(|| corrupted(node.id, "internal node without children"))?;
        end = end
            .checked_sub(RIGHT_MOST_REF_SIZE)
            .filter(|end| *end >= free_start)
            .ok_or_else(|| corrupted(node.id, "node does not fit in page"))?;
        buf[end..end + 4].copy_from_slice(&right_most.to_le_bytes());
    }

    let header = PageHeader {
        page_id: node.id,
        free_start: free_start as u16,
        free_end: end as u16,
        cell_count: cell_count as u16,
        node_type: node.node_type,
    };
    buf[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(())
}

/// Decodes a page buffer into its node.
///
/// Children of internal pages materialize as stub ids only; their nodes are
/// faulted in later by the tree. The node's free length is taken from the
/// header's free region, which equals the free-space formula for any page
/// this codec wrote.
pub fn decode_page(buf: &[u8]) -> Result<Node> {
    let page_size = buf.len();
    if page_size < PAGE_HEADER_SIZE {
        return Err(corrupted(0, "page shorter than header"));
    }

    let header = PageHeader::from_bytes(&buf[..PAGE_HEADER_SIZE]);
    let page_id = header.page_id;
    let free_start = header.free_start as usize;
    let free_end = header.free_end as usize;
    let cell_count = header.cell_count as usize;

    if header.node_type.is_leaf() == header.node_type.is_internal() {
        return Err(corrupted(
            page_id,
            format!("invalid type bits {:#04x}", header.node_type.bits()),
        ));
    }
    if free_start != PAGE_HEADER_SIZE + cell_count * POINTER_SIZE {
        return Err(corrupted(
            page_id,
            format!("cell count {cell_count} disagrees with free-start {free_start}"),
        ));
    }
    if free_end > page_size || free_end < free_start {
        return Err(corrupted(
            page_id,
            format!("free-end {free_end} out of bounds"),
        ));
    }

    let mut pairs = Vec::with_capacity(cell_count);
    let mut cursor = PAGE_HEADER_SIZE;
    while cursor < free_start {
        let offset = u16::from_le_bytes([buf[cursor], buf[cursor + 1]]) as usize;
        let length = u16::from_le_bytes([buf[cursor + 2], buf[cursor + 3]]) as usize;
        cursor += POINTER_SIZE;

        if offset < free_start {
            return Err(corrupted(
                page_id,
                format!("pointer offset {offset} lies in the header region"),
            ));
        }
        if length < CELL_HEADER_SIZE || offset + length > page_size {
            return Err(corrupted(
                page_id,
                format!("pointer ({offset}, {length}) overruns the page"),
            ));
        }

        let cell = &buf[offset..offset + length];
        let key_size = u16::from_le_bytes([cell[0], cell[1]]) as usize;
        let value_size = u16::from_le_bytes([cell[2], cell[3]]) as usize;
        if CELL_HEADER_SIZE + key_size + value_size != length {
            return Err(corrupted(
                page_id,
                format!("cell sizes ({key_size}, {value_size}) disagree with pointer length {length}"),
            ));
        }

        let key_at = CELL_HEADER_SIZE;
        let value_at = key_at + key_size;
        pairs.push(Pair::new(
            Bytes::copy_from_slice(&cell[key_at..key_at + key_size]),
            Bytes::copy_from_slice(&cell[value_at..value_at + value_size]),
        ));
    }

    let mut children = Vec::new();
    if header.node_type.is_internal() {
        for (i, pair) in pairs.iter().enumerate() {
            if pair.value.len() != 4 {
                return Err(corrupted(
                    page_id,
                    format!("internal cell {i} value is not a page id"),
                ));
            }
            children.push(u32::from_le_bytes([
                pair.value[0],
                pair.value[1],
                pair.value[2],
                pair.value[3],
            ]));
        }
        if free_end + RIGHT_MOST_REF_SIZE > page_size {
            return Err(corrupted(page_id, "right-most reference overruns the page"));
        }
        children.push(u32::from_le_bytes([
            buf[free_end],
            buf[free_end + 1],
            buf[free_end + 2],
            buf[free_end + 3],
        ]));
    }

    Ok(Node {
        id: page_id,
        node_type: header.node_type,
        parent: None,
        pairs,
        children,
        dirty: false,
        free_length: (free_end - free_start) as i32,
    })
}
