//! Storage engine for LoamDB.
//!
//! This crate provides:
//! - Slotted-page codec for B+Tree nodes
//! - Pager for page-aligned file I/O
//! - In-memory node model mirroring the on-disk pages
//! - The B+Tree engine: search, upsert, split, and vacuum

mod node;
mod page;
mod pager;
mod tree;

pub use node::{child_id_value, Node, NodeType, Pair, MAX_KEY_SIZE, MAX_VALUE_SIZE};
pub use page::{
    decode_page, encode_node, PageHeader, CELL_HEADER_SIZE, PAGE_HEADER_SIZE, POINTER_SIZE,
    RIGHT_MOST_REF_SIZE, ROOT_PAGE_ID,
};
pub use pager::{page_offset, PageBuf, Pager};
pub use tree::{BTree, UpsertOutcome};
