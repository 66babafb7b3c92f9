//! OS abstraction.
//!
//! A thin trait over file/directory/volume primitives, mockable for tests
//! the way the teacher crate mocks the FUSE channel behind `ChannelSender`
//! in `src/channel.rs`. The real implementation is backed by `nix` and
//! `std::fs`; unit and integration tests use an in-memory mock instead of
//! touching a real filesystem.

use std::io::{self, Read, Seek, Write};

use crate::path::FmPath;

/// A writer that can also seek, so a caller can reserve space for a header,
/// stream the body, then come back and patch the header in place once the
/// final counts are known (spec.md §6 "Directory list to file"). Blanket
/// implemented for anything that's both, the same way the standard library
/// treats `Read + Seek` as a natural pairing for `File`.
pub trait PatchableWriter: Write + Seek {}
impl<T: Write + Seek> PatchableWriter for T {}

/// What a path currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// Nothing at this path.
    Missing,
}

/// Cheap metadata snapshot, cached by the `name-valid` validator so
/// `GET_FILE_INFO` doesn't need to re-stat (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Metadata {
    /// Size in bytes (0 if missing).
    pub size: u64,
    /// Modification time, Unix seconds (0 if missing).
    pub mtime: u64,
    /// Permission bits (0 if missing).
    pub mode: u32,
}

/// One entry in the open-files telemetry packet.
#[derive(Debug, Clone)]
pub struct OpenFileEntry {
    /// Owning task's name.
    pub task_name: String,
    /// Path of the open file.
    pub file_name: String,
}

/// Trait over every file-system primitive the command processor and child
/// worker need. Implementations must be safe to call from either thread
/// (spec.md's two worker threads never call this concurrently on the same
/// path in a way that matters -- FM is the sole authorized mutator).
pub trait OsShim: Send + Sync {
    /// What kind of thing (if anything) lives at `path`, plus cheap metadata.
    fn stat(&self, path: &FmPath) -> (EntryKind, Metadata);

    /// True if some task currently holds `path` open.
    fn is_open(&self, path: &FmPath) -> bool;

    /// Rename/move `from` to `to`.
    fn rename(&self, from: &FmPath, to: &FmPath) -> io::Result<()>;

    /// Remove a regular file.
    fn remove_file(&self, path: &FmPath) -> io::Result<()>;

    /// Create a directory (non-recursive; parent must exist).
    fn create_dir(&self, path: &FmPath) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &FmPath) -> io::Result<()>;

    /// Change permission bits.
    fn set_permissions(&self, path: &FmPath, mode: u32) -> io::Result<()>;

    /// List entry names directly under `path`, in a stable order.
    fn read_dir_names(&self, path: &FmPath) -> io::Result<Vec<String>>;

    /// Stat one named entry under `dir` (used in `QUERY_FS` mode).
    fn stat_entry(&self, dir: &FmPath, name: &str) -> io::Result<Metadata>;

    /// Free blocks on the volume named by `name`.
    fn stat_volume(&self, name: &FmPath) -> io::Result<u64>;

    /// Every currently open file, across every task.
    fn open_files(&self) -> Vec<OpenFileEntry>;

    /// Open `path` for bounded-buffer streaming reads.
    fn open_reader(&self, path: &FmPath) -> io::Result<Box<dyn Read + Send>>;

    /// Create (truncating) `path` for bounded-buffer streaming writes.
    fn create_writer(&self, path: &FmPath) -> io::Result<Box<dyn Write + Send>>;

    /// Create (truncating) `path` for a writer that also supports seeking
    /// back to patch an already-written header (used by `GET_DIR_FILE`'s
    /// streamed listing).
    fn create_patchable_writer(&self, path: &FmPath) -> io::Result<Box<dyn PatchableWriter + Send>>;

    /// Decompress `source` into `target`.
    #[cfg(feature = "decompress")]
    fn decompress(&self, source: &FmPath, target: &FmPath) -> io::Result<()>;
}

/// Real, OS-backed implementation.
#[derive(Debug, Default)]
pub struct RealOsShim;

impl RealOsShim {
    fn meta_of(path: &std::path::Path) -> (EntryKind, Metadata) {
        match std::fs::symlink_metadata(path) {
            Ok(m) => {
                let kind = if m.is_dir() {
                    EntryKind::Directory
                } else if m.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Missing
                };
                let mtime = m
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                use std::os::unix::fs::PermissionsExt;
                (
                    kind,
                    Metadata {
                        size: m.len(),
                        mtime,
                        mode: m.permissions().mode(),
                    },
                )
            }
            Err(_) => (EntryKind::Missing, Metadata::default()),
        }
    }
}

impl OsShim for RealOsShim {
    fn stat(&self, path: &FmPath) -> (EntryKind, Metadata) {
        Self::meta_of(path.as_path())
    }

    fn is_open(&self, path: &FmPath) -> bool {
        // No portable, race-free "is this path open" probe exists outside
        // of /proc scraping; real deployments plug a bus-backed query here.
        // Conservatively reports "not open" so closed-file validators still
        // function in environments without /proc (e.g. non-Linux targets).
        #[cfg(target_os = "linux")]
        {
            let target = match std::fs::canonicalize(path.as_path()) {
                Ok(p) => p,
                Err(_) => return false,
            };
            let proc_self_fd = std::path::Path::new("/proc/self/fd");
            if let Ok(entries) = std::fs::read_dir(proc_self_fd) {
                for entry in entries.flatten() {
                    if let Ok(resolved) = std::fs::read_link(entry.path()) {
                        if resolved == target {
                            return true;
                        }
                    }
                }
            }
            false
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    fn rename(&self, from: &FmPath, to: &FmPath) -> io::Result<()> {
        std::fs::rename(from.as_path(), to.as_path())
    }

    fn remove_file(&self, path: &FmPath) -> io::Result<()> {
        std::fs::remove_file(path.as_path())
    }

    fn create_dir(&self, path: &FmPath) -> io::Result<()> {
        std::fs::create_dir(path.as_path())
    }

    fn remove_dir(&self, path: &FmPath) -> io::Result<()> {
        std::fs::remove_dir(path.as_path())
    }

    fn set_permissions(&self, path: &FmPath, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path.as_path(), std::fs::Permissions::from_mode(mode))
    }

    fn read_dir_names(&self, path: &FmPath) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(path.as_path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn stat_entry(&self, dir: &FmPath, name: &str) -> io::Result<Metadata> {
        let mut full = std::path::PathBuf::from(dir);
        full.push(name);
        let (_, meta) = Self::meta_of(&full);
        Ok(meta)
    }

    fn stat_volume(&self, name: &FmPath) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(name.as_path()).map_err(io::Error::from)?;
        Ok(stat.blocks_free() as u64)
    }

    fn open_files(&self) -> Vec<OpenFileEntry> {
        Vec::new()
    }

    fn open_reader(&self, path: &FmPath) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(path.as_path())?))
    }

    fn create_writer(&self, path: &FmPath) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(std::fs::File::create(path.as_path())?))
    }

    fn create_patchable_writer(
        &self,
        path: &FmPath,
    ) -> io::Result<Box<dyn PatchableWriter + Send>> {
        Ok(Box::new(std::fs::File::create(path.as_path())?))
    }

    #[cfg(feature = "decompress")]
    fn decompress(&self, source: &FmPath, target: &FmPath) -> io::Result<()> {
        use flate2::read::GzDecoder;
        let input = std::fs::File::open(source.as_path())?;
        let mut decoder = GzDecoder::new(input);
        let mut output = std::fs::File::create(target.as_path())?;
        std::io::copy(&mut decoder, &mut output)?;
        Ok(())
    }
}

/// An in-memory `OsShim` double, used by unit tests in this crate and by
/// the end-to-end scenario tests under `tests/`. Mirrors the style of
/// `fuser-tests`: a hand-built stand-in rather than mocking-framework
/// macros, since the surface here is small and exercised directly.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Clone)]
    enum Node {
        File(Vec<u8>, u64 /* mtime */, u32 /* mode */),
        Dir,
    }

    /// In-memory filesystem double plus an open-file registry and a fake
    /// per-volume free-block table.
    pub struct MockOsShim {
        nodes: Arc<Mutex<BTreeMap<String, Node>>>,
        open: Mutex<std::collections::BTreeSet<String>>,
        volumes: Mutex<BTreeMap<String, u64>>,
    }

    impl Default for MockOsShim {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockOsShim {
        /// An empty mock filesystem.
        pub fn new() -> Self {
            MockOsShim {
                nodes: Arc::new(Mutex::new(BTreeMap::new())),
                open: Mutex::new(std::collections::BTreeSet::new()),
                volumes: Mutex::new(BTreeMap::new()),
            }
        }

        /// Seed a regular file with the given content.
        pub fn put_file(&self, path: &str, content: &[u8]) {
            self.nodes.lock().insert(
                path.to_string(),
                Node::File(content.to_vec(), 0, 0o644),
            );
        }

        /// Seed a directory (non-recursive; does not create parents).
        pub fn put_dir(&self, path: &str) {
            self.nodes.lock().insert(path.to_string(), Node::Dir);
        }

        /// Mark a path as currently held open by some task.
        pub fn mark_open(&self, path: &str) {
            self.open.lock().insert(path.to_string());
        }

        /// Mark a path as no longer open.
        pub fn mark_closed(&self, path: &str) {
            self.open.lock().remove(path);
        }

        /// Seed a volume's reported free-block count.
        pub fn put_volume(&self, name: &str, blocks_free: u64) {
            self.volumes.lock().insert(name.to_string(), blocks_free);
        }

        /// Read back a file's content (test assertion helper).
        pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
            match self.nodes.lock().get(path) {
                Some(Node::File(data, _, _)) => Some(data.clone()),
                _ => None,
            }
        }

        fn key(path: &FmPath) -> String {
            path.as_str().unwrap_or_default().to_string()
        }
    }

    impl OsShim for MockOsShim {
        fn stat(&self, path: &FmPath) -> (EntryKind, Metadata) {
            match self.nodes.lock().get(&Self::key(path)) {
                Some(Node::File(data, mtime, mode)) => (
                    EntryKind::File,
                    Metadata {
                        size: data.len() as u64,
                        mtime: *mtime,
                        mode: *mode,
                    },
                ),
                Some(Node::Dir) => (EntryKind::Directory, Metadata::default()),
                None => (EntryKind::Missing, Metadata::default()),
            }
        }

        fn is_open(&self, path: &FmPath) -> bool {
            self.open.lock().contains(&Self::key(path))
        }

        fn rename(&self, from: &FmPath, to: &FmPath) -> io::Result<()> {
            let mut nodes = self.nodes.lock();
            let node = nodes
                .remove(&Self::key(from))
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            nodes.insert(Self::key(to), node);
            Ok(())
        }

        fn remove_file(&self, path: &FmPath) -> io::Result<()> {
            let mut nodes = self.nodes.lock();
            match nodes.get(&Self::key(path)) {
                Some(Node::File(..)) => {
                    nodes.remove(&Self::key(path));
                    Ok(())
                }
                _ => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }

        fn create_dir(&self, path: &FmPath) -> io::Result<()> {
            self.nodes.lock().insert(Self::key(path), Node::Dir);
            Ok(())
        }

        fn remove_dir(&self, path: &FmPath) -> io::Result<()> {
            let mut nodes = self.nodes.lock();
            let key = Self::key(path);
            let has_children = nodes
                .keys()
                .any(|k| k != &key && k.starts_with(&format!("{key}/")));
            if has_children {
                return Err(io::Error::from(io::ErrorKind::Other));
            }
            match nodes.get(&key) {
                Some(Node::Dir) => {
                    nodes.remove(&key);
                    Ok(())
                }
                _ => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }

        fn set_permissions(&self, path: &FmPath, mode: u32) -> io::Result<()> {
            let mut nodes = self.nodes.lock();
            match nodes.get_mut(&Self::key(path)) {
                Some(Node::File(_, _, m)) => {
                    *m = mode;
                    Ok(())
                }
                _ => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }

        fn read_dir_names(&self, path: &FmPath) -> io::Result<Vec<String>> {
            let nodes = self.nodes.lock();
            let key = Self::key(path);
            match nodes.get(&key) {
                Some(Node::Dir) => {}
                _ => return Err(io::Error::from(io::ErrorKind::NotFound)),
            }
            let prefix = format!("{key}/");
            let mut names: Vec<String> = nodes
                .keys()
                .filter_map(|k| {
                    k.strip_prefix(&prefix)
                        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                        .map(|rest| rest.to_string())
                })
                .collect();
            names.sort();
            Ok(names)
        }

        fn stat_entry(&self, dir: &FmPath, name: &str) -> io::Result<Metadata> {
            let full = format!("{}/{}", Self::key(dir), name);
            match self.nodes.lock().get(&full) {
                Some(Node::File(data, mtime, mode)) => Ok(Metadata {
                    size: data.len() as u64,
                    mtime: *mtime,
                    mode: *mode,
                }),
                Some(Node::Dir) => Ok(Metadata::default()),
                None => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }

        fn stat_volume(&self, name: &FmPath) -> io::Result<u64> {
            self.volumes
                .lock()
                .get(&Self::key(name))
                .copied()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn open_files(&self) -> Vec<OpenFileEntry> {
            self.open
                .lock()
                .iter()
                .map(|p| OpenFileEntry {
                    task_name: "FM_APP".to_string(),
                    file_name: p.clone(),
                })
                .collect()
        }

        fn open_reader(&self, path: &FmPath) -> io::Result<Box<dyn Read + Send>> {
            match self.nodes.lock().get(&Self::key(path)) {
                Some(Node::File(data, _, _)) => Ok(Box::new(io::Cursor::new(data.clone()))),
                _ => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }

        fn create_writer(&self, path: &FmPath) -> io::Result<Box<dyn Write + Send>> {
            self.nodes
                .lock()
                .insert(Self::key(path), Node::File(Vec::new(), 0, 0o644));
            Ok(Box::new(MockWriter {
                path: Self::key(path),
                nodes: self.nodes.clone(),
            }))
        }

        fn create_patchable_writer(
            &self,
            path: &FmPath,
        ) -> io::Result<Box<dyn PatchableWriter + Send>> {
            self.nodes
                .lock()
                .insert(Self::key(path), Node::File(Vec::new(), 0, 0o644));
            Ok(Box::new(MockPatchWriter {
                path: Self::key(path),
                nodes: self.nodes.clone(),
                pos: 0,
            }))
        }

        #[cfg(feature = "decompress")]
        fn decompress(&self, source: &FmPath, target: &FmPath) -> io::Result<()> {
            // The mock treats "decompression" as a byte-identical copy so
            // tests can assert on content without needing a real gzip
            // fixture.
            let data = match self.nodes.lock().get(&Self::key(source)) {
                Some(Node::File(data, _, _)) => data.clone(),
                _ => return Err(io::Error::from(io::ErrorKind::NotFound)),
            };
            self.nodes
                .lock()
                .insert(Self::key(target), Node::File(data, 0, 0o644));
            Ok(())
        }
    }

    /// Writer handle returned by `create_writer`; buffers writes and flushes
    /// them into the mock's node table on each `write`/`flush` call.
    struct MockWriter {
        path: String,
        nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    }

    impl Write for MockWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut nodes = self.nodes.lock();
            if let Some(Node::File(data, ..)) = nodes.get_mut(&self.path) {
                data.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer handle backing [`PatchableWriter`]: writes land at `pos` in the
    /// node's byte buffer (growing it as needed) rather than always
    /// appending, and `seek` moves `pos` without touching the buffer, so a
    /// caller can rewind and overwrite a header after streaming the body.
    struct MockPatchWriter {
        path: String,
        nodes: Arc<Mutex<BTreeMap<String, Node>>>,
        pos: usize,
    }

    impl Write for MockPatchWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut nodes = self.nodes.lock();
            if let Some(Node::File(data, ..)) = nodes.get_mut(&self.path) {
                let end = self.pos + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[self.pos..end].copy_from_slice(buf);
                self.pos = end;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for MockPatchWriter {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            let len = match self.nodes.lock().get(&self.path) {
                Some(Node::File(data, ..)) => data.len(),
                _ => 0,
            };
            let new_pos = match pos {
                io::SeekFrom::Start(n) => n as i64,
                io::SeekFrom::End(n) => len as i64 + n,
                io::SeekFrom::Current(n) => self.pos as i64 + n,
            };
            if new_pos < 0 {
                return Err(io::Error::from(io::ErrorKind::InvalidInput));
            }
            self.pos = new_pos as usize;
            Ok(self.pos as u64)
        }
    }
}
