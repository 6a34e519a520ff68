use crate::array_store::{ArrayStore, NpzArrayStore};
use crate::errors::TraceError;
use std::collections::{BTreeSet, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError>;
    /// Publishes `contents` only if nothing exists at `path` yet. Returns
    /// `false` when another writer got there first.
    fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool, TraceError>;
    /// Creates `path` (and parents). Returns `false` if it already existed.
    fn ensure_dir(&self, path: &Path) -> Result<bool, TraceError>;
    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, TraceError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), TraceError>;
}

fn missing_or_io(path: &Path, error: std::io::Error) -> TraceError {
    if error.kind() == ErrorKind::NotFound {
        TraceError::MissingTraceFile {
            file: path.display().to_string(),
        }
    } else {
        TraceError::Io(format!("{}: {error}", path.display()))
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError> {
        std::fs::read_to_string(path).map_err(|e| missing_or_io(path, e))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError> {
        std::fs::write(path, contents).map_err(|e| TraceError::Io(e.to_string()))
    }

    fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool, TraceError> {
        if path.exists() {
            return Ok(false);
        }
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| TraceError::Io(format!("{}: {e}", parent.display())))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| TraceError::Io(format!("{}: {e}", tmp.path().display())))?;

        // No-clobber publish: the first complete file wins and is never
        // rewritten; the losing temp file is removed on drop.
        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(TraceError::Io(format!("{}: {}", path.display(), e.error))),
        }
    }

    fn ensure_dir(&self, path: &Path) -> Result<bool, TraceError> {
        if path.is_dir() {
            return Ok(false);
        }
        match std::fs::create_dir_all(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(TraceError::Io(format!("{}: {e}", path.display()))),
        }
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, TraceError> {
        let mut dirs = std::fs::read_dir(path)
            .map_err(|e| missing_or_io(path, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();
        dirs.sort();
        Ok(dirs)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), TraceError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| TraceError::Io(e.to_string()))
    }
}

pub struct TraceRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub array_store: Arc<dyn ArrayStore>,
    pub terminal: Arc<dyn Terminal>,
}

impl TraceRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            array_store: Arc::new(NpzArrayStore),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for TraceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
    writes: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<TraceError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: TraceError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    /// Every path passed to a successful write, in order.
    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    pub fn remove(&self, path: &Path) {
        self.files.lock().expect("files lock").remove(path);
    }

    fn maybe_fail(&self) -> Result<(), TraceError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TraceError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| TraceError::MissingTraceFile {
                file: path.display().to_string(),
            })
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TraceError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        self.writes
            .lock()
            .expect("writes lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool, TraceError> {
        self.maybe_fail()?;
        let mut files = self.files.lock().expect("files lock");
        if files.contains_key(path) {
            return Ok(false);
        }
        files.insert(path.to_path_buf(), contents.to_string());
        self.writes
            .lock()
            .expect("writes lock")
            .push(path.to_path_buf());
        Ok(true)
    }

    fn ensure_dir(&self, path: &Path) -> Result<bool, TraceError> {
        self.maybe_fail()?;
        Ok(self
            .dirs
            .lock()
            .expect("dirs lock")
            .insert(path.to_path_buf()))
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, TraceError> {
        self.maybe_fail()?;
        Ok(self
            .dirs
            .lock()
            .expect("dirs lock")
            .iter()
            .filter(|dir| dir.parent() == Some(path))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self.dirs.lock().expect("dirs lock").contains(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), TraceError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_write_if_absent_keeps_first_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dict_action_space.json");
        let fs = ProductionFileSystem;

        assert!(fs.write_if_absent(&path, "first").expect("first write"));
        assert!(!fs.write_if_absent(&path, "second").expect("second write"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "first");

        let entries = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(entries, vec!["dict_action_space.json".to_string()]);
    }

    #[test]
    fn concurrent_write_if_absent_publishes_exactly_one_writer() {
        use std::sync::Barrier;

        for round in 0..50 {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("dict_observation_space.json");
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let handles = (0..threads)
                .map(|writer| {
                    let barrier = Arc::clone(&barrier);
                    let path = path.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        ProductionFileSystem.write_if_absent(&path, &format!("writer-{writer}"))
                    })
                })
                .collect::<Vec<_>>();

            let mut published = 0;
            for handle in handles {
                match handle.join().expect("join") {
                    Ok(true) => published += 1,
                    Ok(false) => {}
                    Err(err) => panic!("round {round}: write_if_absent failed: {err}"),
                }
            }
            assert_eq!(published, 1, "round {round}");

            let contents = std::fs::read_to_string(&path).expect("read");
            assert!(contents.starts_with("writer-"), "round {round}: {contents}");
            let entries = std::fs::read_dir(dir.path()).expect("read dir").count();
            assert_eq!(entries, 1, "round {round}: temp files left behind");
        }
    }

    #[test]
    fn production_ensure_dir_reports_creation_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent").join("episode_0");
        let fs = ProductionFileSystem;
        assert!(fs.ensure_dir(&path).expect("create"));
        assert!(!fs.ensure_dir(&path).expect("exists"));
    }

    #[test]
    fn production_read_of_missing_file_names_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ProductionFileSystem
            .read_to_string(&dir.path().join("episode_meta.json"))
            .expect_err("missing");
        assert!(matches!(err, TraceError::MissingTraceFile { file } if file.ends_with("episode_meta.json")));
    }

    #[test]
    fn fake_file_system_lists_child_dirs_only() {
        let fs = FakeFileSystem::default();
        fs.ensure_dir(Path::new("/root/a")).expect("a");
        fs.ensure_dir(Path::new("/root/a/b")).expect("b");
        fs.ensure_dir(Path::new("/root/c")).expect("c");
        let dirs = fs.list_dirs(Path::new("/root")).expect("list");
        assert_eq!(dirs, vec![PathBuf::from("/root/a"), PathBuf::from("/root/c")]);
    }
}
