//! Pager: owns the database file and performs whole-page I/O.
//!
//! Every read and write is an absolute-offset, whole-page operation at
//! `page_id * page_size`. The file is opened with direct I/O where the
//! platform and filesystem support it, so transfer buffers are allocated
//! page-aligned.

use crate::node::Node;
use crate::page::{self, ROOT_PAGE_ID};
use loam_common::{LoamError, Result, StorageConfig};
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest accepted page size; free-start and free-end are u16 offsets.
pub const MAX_PAGE_SIZE: usize = 32_768;

/// Returns the file offset of a page.
pub fn page_offset(page_id: u32, page_size: usize) -> u64 {
    page_id as u64 * page_size as u64
}

/// A page-sized heap buffer aligned to the page size, as direct I/O requires.
#[derive(Debug)]
pub struct PageBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// PageBuf owns its allocation and hands out access only through &/&mut self.
unsafe impl Send for PageBuf {}
unsafe impl Sync for PageBuf {}

impl PageBuf {
    /// Allocates a zeroed buffer of `page_size` bytes aligned to `page_size`.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two or the allocation fails.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size.is_power_of_two());
        let layout = Layout::from_size_align(page_size, page_size).expect("invalid layout");
        // SAFETY: layout has non-zero size and power-of-two alignment
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).expect("allocation failed");
        Self {
            ptr,
            len: page_size,
        }
    }
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, self.len).expect("invalid layout");
        // SAFETY: allocated in new() with the identical layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

/// Manages reading and writing pages of the single backing file.
#[derive(Debug)]
pub struct Pager {
    /// Page size the file is laid out with.
    page_size: usize,
    /// The file handle.
    file: Mutex<File>,
    /// Path to the database file.
    #[allow(dead_code)]
    path: PathBuf,
}

impl Pager {
    /// Opens the database file, creating it (and missing parent directories)
    /// if needed.
    ///
    /// Attempts to read the root page; end-of-file means the file is new, in
    /// which case an empty root is synthesized and flushed. Returns the pager
    /// together with the materialized root node, and stores the highest
    /// assigned page id into `node_count`.
    pub fn open(config: &StorageConfig, node_count: &AtomicU32) -> Result<(Self, Node)> {
        let page_size = config.page_size;
        if !page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
        {
            return Err(LoamError::InvalidParameter {
                name: "page_size".to_string(),
                value: page_size.to_string(),
            });
        }

        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = open_page_file(&config.path, config.direct_io)?;
        let pager = Self {
            page_size,
            file: Mutex::new(file),
            path: config.path.clone(),
        };

        match pager.read_node(ROOT_PAGE_ID) {
            Ok(root) => {
                let file_len = pager.file.lock().metadata()?.len();
                let pages = (file_len / page_size as u64) as u32;
                node_count.store(pages.saturating_sub(1), Ordering::SeqCst);
                Ok((pager, root))
            }
            Err(LoamError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                // fresh file: commit the empty root before anything else
                let root = Node::new_root(page_size);
                pager.write_node(&root)?;
                node_count.store(ROOT_PAGE_ID, Ordering::SeqCst);
                Ok((pager, root))
            }
            Err(err) => Err(err),
        }
    }

    /// Page size the pager was opened with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reads the page with the given id into an aligned buffer.
    pub fn read_page(&self, page_id: u32) -> Result<PageBuf> {
        let mut buf = PageBuf::new(self.page_size);
        let offset = page_offset(page_id, self.page_size);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        debug!(page_id, "read page from disk");
        Ok(buf)
    }

    /// Writes a whole page at the id's offset.
    pub fn write_page(&self, page_id: u32, buf: &PageBuf) -> Result<()> {
        let offset = page_offset(page_id, self.page_size);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;

        debug!(page_id, bytes = buf.len(), "wrote page to disk");
        Ok(())
    }

    /// Reads and decodes the node stored at the given page id.
    pub fn read_node(&self, page_id: u32) -> Result<Node> {
        let buf = self.read_page(page_id)?;
        page::decode_page(&buf)
    }

    /// Encodes and writes a node to its page.
    pub fn write_node(&self, node: &Node) -> Result<()> {
        let mut buf = PageBuf::new(self.page_size);
        page::encode_node(node, &mut buf)?;
        self.write_page(node.id, &buf)
    }
}

/// Opens the backing file read-write with create-if-missing, requesting
/// direct I/O when asked. Filesystems without O_DIRECT support (tmpfs among
/// them) reject the flag with EINVAL; that is degraded to buffered I/O with
/// a warning rather than a failed open.
fn open_page_file(path: &Path, direct_io: bool) -> Result<File> {
    #[cfg(target_os = "linux")]
    if direct_io {
        use std::os::unix::fs::OpenOptionsExt;
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => {
                warn!(
                    path = %path.display(),
                    "filesystem rejected O_DIRECT, falling back to buffered I/O"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    #[cfg(target_os = "macos")]
    if direct_io {
        use std::os::unix::io::AsRawFd;
        // macOS has no O_DIRECT; F_NOCACHE disables caching on the open fd
        unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    let _ = direct_io;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, Pair};
    use bytes::Bytes;
    use tempfile::tempdir;

    fn test_config(dir: &Path, page_size: usize) -> StorageConfig {
        StorageConfig {
            path: dir.join("test.db"),
            page_size,
            direct_io: false,
        }
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 4096), 4096);
        assert_eq!(page_offset(2, 4096), 2 * 4096);
        assert_eq!(page_offset(0, 8192), 0);
    }

    #[test]
    fn test_page_buf_alignment() {
        let buf = PageBuf::new(4096);
        assert_eq!(buf.as_ptr() as usize % 4096, 0);
        assert_eq!(buf.len(), 4096);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_open_fresh_file_creates_root() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);
        let node_count = AtomicU32::new(0);

        let (pager, root) = Pager::open(&config, &node_count).unwrap();
        assert_eq!(root.id, ROOT_PAGE_ID);
        assert!(root.is_root());
        assert!(root.is_leaf());
        assert!(root.pairs.is_empty());
        assert_eq!(root.free_length, 4096 - 16);
        assert_eq!(node_count.load(Ordering::SeqCst), 1);

        // page 0 reserved + root page
        let len = std::fs::metadata(&config.path).unwrap().len();
        assert_eq!(len, 2 * 4096);
        drop(pager);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().join("nested/deeper/test.db"),
            page_size: 4096,
            direct_io: false,
        };
        let node_count = AtomicU32::new(0);

        let (_pager, _root) = Pager::open(&config, &node_count).unwrap();
        assert!(config.path.exists());
    }

    #[test]
    fn test_open_rejects_bad_page_size() {
        let dir = tempdir().unwrap();
        let node_count = AtomicU32::new(0);

        for page_size in [0, 100, 48, 1 << 20] {
            let config = test_config(dir.path(), page_size);
            let err = Pager::open(&config, &node_count).unwrap_err();
            assert!(matches!(err, LoamError::InvalidParameter { .. }));
        }
    }

    #[test]
    fn test_reopen_reads_existing_root() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);

        {
            let node_count = AtomicU32::new(0);
            let (pager, mut root) = Pager::open(&config, &node_count).unwrap();
            root.pairs.push(Pair::new(
                Bytes::from_static(b"key"),
                Bytes::from_static(b"value"),
            ));
            root.recompute_free_length(4096);
            pager.write_node(&root).unwrap();
        }

        let node_count = AtomicU32::new(0);
        let (_pager, root) = Pager::open(&config, &node_count).unwrap();
        assert_eq!(root.pairs.len(), 1);
        assert_eq!(root.pairs[0].key.as_ref(), b"key");
        assert_eq!(node_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_read_page_roundtrip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);
        let node_count = AtomicU32::new(0);
        let (pager, _root) = Pager::open(&config, &node_count).unwrap();

        let mut buf = PageBuf::new(4096);
        buf[0] = 0xAB;
        buf[100] = 0xCD;
        buf[4095] = 0xEF;
        pager.write_page(3, &buf).unwrap();

        let read = pager.read_page(3).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[100], 0xCD);
        assert_eq!(read[4095], 0xEF);
    }

    #[test]
    fn test_write_read_node_roundtrip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);
        let node_count = AtomicU32::new(0);
        let (pager, _root) = Pager::open(&config, &node_count).unwrap();

        let mut node = Node {
            id: 2,
            node_type: NodeType::new(NodeType::LEAF),
            parent: None,
            pairs: vec![Pair::new(
                Bytes::from_static(b"hello"),
                Bytes::from_static(b"world"),
            )],
            children: Vec::new(),
            dirty: true,
            free_length: 0,
        };
        node.recompute_free_length(4096);
        pager.write_node(&node).unwrap();

        let read = pager.read_node(2).unwrap();
        assert_eq!(read.pairs, node.pairs);
        assert_eq!(read.node_type, node.node_type);
        assert!(!read.dirty);
    }

    #[test]
    fn test_read_past_eof_is_io_error() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);
        let node_count = AtomicU32::new(0);
        let (pager, _root) = Pager::open(&config, &node_count).unwrap();

        let err = pager.read_page(99).unwrap_err();
        match err {
            LoamError::Io(err) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected I/O error, got {other}"),
        }
    }

    #[test]
    fn test_file_grows_by_page_on_first_flush() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 4096);
        let node_count = AtomicU32::new(0);
        let (pager, _root) = Pager::open(&config, &node_count).unwrap();

        let mut node = Node::new_root(4096);
        node.id = 2;
        node.node_type = NodeType::new(NodeType::LEAF);
        pager.write_node(&node).unwrap();

        let len = std::fs::metadata(&config.path).unwrap().len();
        assert_eq!(len, 3 * 4096);
    }
}
