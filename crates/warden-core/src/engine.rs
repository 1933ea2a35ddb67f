//! Streaming file and directory-tree encryption.
//!
//! Files are transformed in place: the whole transformed payload is
//! materialized before the target is truncated and rewritten. Directory
//! operations expand the tree level by level and isolate failures per file,
//! so one unreadable file never aborts the rest of the walk.

use crate::crypto::{BlockStream, DerivedKey, Direction};
use crate::error::{Result, WardenError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const CHUNK_SIZE: usize = 4 * 1024;

#[cfg(not(windows))]
const SYSTEM_DIRS: [&str; 5] = ["/bin", "/sbin", "/etc", "/usr/bin", "/usr/sbin"];

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
    #[error("padding check failed")]
    Padding,
}

#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: WardenError,
}

/// Outcome of transforming one target (a file, or every file under a directory).
#[derive(Debug)]
pub struct TransformReport {
    pub root: PathBuf,
    pub is_directory: bool,
    pub transformed: Vec<PathBuf>,
    /// Files left alone by the system-path guard.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

impl TransformReport {
    fn new(root: &Path, is_directory: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            is_directory,
            transformed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn files_seen(&self) -> usize {
        self.transformed.len() + self.skipped.len() + self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    chunk_size: usize,
    guarded: Vec<PathBuf>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            guarded: default_guarded_roots(),
        }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::new()
        }
    }

    /// Adds directories the engine must refuse to touch, on top of the OS defaults.
    pub fn with_guarded_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.guarded.extend(roots);
        self
    }

    /// True when `path`, after resolving `..` and symlinks, lies under a
    /// guarded root or carries the OS system-file marker.
    pub fn is_guarded(&self, path: &Path) -> io::Result<bool> {
        Ok(is_under_any(path, &self.guarded)? || has_system_attribute(path)?)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Runs `source` through the cipher chunk by chunk and returns every produced byte.
    pub fn transform<R: Read>(
        &self,
        mut source: R,
        direction: Direction,
        key: &DerivedKey,
    ) -> std::result::Result<Vec<u8>, StreamError> {
        let mut stream = BlockStream::new(direction, key);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut produced = Vec::new();
        loop {
            let n = source.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            produced.extend(stream.update(&buffer[..n]));
        }
        let tail = stream.finalize().map_err(|_| StreamError::Padding)?;
        produced.extend(tail);
        Ok(produced)
    }

    /// Transforms a file or, recursively, every regular file under a directory.
    ///
    /// Errors on the target itself (missing, guarded, a single file that fails)
    /// are returned; per-file errors inside a directory land in the report.
    pub fn transform_path(
        &self,
        path: &Path,
        direction: Direction,
        password: &str,
    ) -> Result<TransformReport> {
        if !path.exists() {
            return Err(WardenError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return self.transform_directory(path, direction, password);
        }
        self.transform_file(path, direction, password)?;
        let mut report = TransformReport::new(path, false);
        report.transformed.push(path.to_path_buf());
        Ok(report)
    }

    pub fn transform_file(&self, path: &Path, direction: Direction, password: &str) -> Result<()> {
        self.transform_file_to(path, path, direction, password)
    }

    /// Transforms `input` into `output`, which may be the same file.
    pub fn transform_file_to(
        &self,
        input: &Path,
        output: &Path,
        direction: Direction,
        password: &str,
    ) -> Result<()> {
        if !input.exists() {
            return Err(WardenError::NotFound(input.to_path_buf()));
        }
        if self.is_guarded(input).map_err(|e| WardenError::io(input, e))? {
            return Err(WardenError::SecurityViolation(input.to_path_buf()));
        }
        if input.is_dir() {
            return Err(WardenError::InvalidArgument(format!(
                "{} is a directory",
                input.display()
            )));
        }

        let key = DerivedKey::from_password(password);

        if !output.exists() {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(output)
                .map_err(|source| WardenError::OutputUnavailable {
                    path: output.to_path_buf(),
                    source,
                })?;
            debug!(path = %output.display(), "output file created");
        }

        let file = File::open(input).map_err(|e| WardenError::io(input, e))?;
        let bytes = self
            .transform(BufReader::new(file), direction, &key)
            .map_err(|e| match e {
                StreamError::Padding => WardenError::CryptoFailure(input.to_path_buf()),
                StreamError::Read(source) => WardenError::io(input, source),
            })?;

        fs::write(output, &bytes).map_err(|e| WardenError::io(output, e))?;
        info!(path = %input.display(), "file {}", direction.done());
        Ok(())
    }

    pub fn transform_directory(
        &self,
        dir: &Path,
        direction: Direction,
        password: &str,
    ) -> Result<TransformReport> {
        if !dir.exists() {
            return Err(WardenError::NotFound(dir.to_path_buf()));
        }
        if self.is_guarded(dir).map_err(|e| WardenError::io(dir, e))? {
            return Err(WardenError::SecurityViolation(dir.to_path_buf()));
        }

        let mut report = TransformReport::new(dir, true);
        let files = expand_directory(dir, &mut report.failures);

        for file in files {
            match self.transform_file(&file, direction, password) {
                Ok(()) => report.transformed.push(file),
                Err(WardenError::SecurityViolation(path)) => {
                    warn!(path = %path.display(), "skipping system file");
                    report.skipped.push(path);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(error) => {
                    warn!(path = %file.display(), %error, "could not {} file", verb(direction));
                    report.failures.push(FileFailure { path: file, error });
                }
            }
        }

        info!(
            dir = %dir.display(),
            transformed = report.transformed.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "directory {}",
            direction.done()
        );
        Ok(report)
    }
}

fn verb(direction: Direction) -> &'static str {
    match direction {
        Direction::Encrypt => "encrypt",
        Direction::Decrypt => "decrypt",
    }
}

/// Every regular file under `dir`, shallowest level first. Entries that cannot
/// be listed are recorded as failures and the walk carries on.
pub fn expand_directory(dir: &Path, failures: &mut Vec<FileFailure>) -> Vec<PathBuf> {
    let mut files: Vec<(usize, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                files.push((entry.depth(), entry.into_path()));
            }
            Ok(_) => {}
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf());
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
                warn!(path = %path.display(), error = %source, "cannot list entry");
                failures.push(FileFailure {
                    error: WardenError::io(&path, source),
                    path,
                });
            }
        }
    }
    files.sort_by_key(|(depth, _)| *depth);
    files.into_iter().map(|(_, path)| path).collect()
}

fn default_guarded_roots() -> Vec<PathBuf> {
    #[cfg(not(windows))]
    {
        SYSTEM_DIRS.iter().map(PathBuf::from).collect()
    }
    #[cfg(windows)]
    {
        Vec::new()
    }
}

/// OS-critical locations the engine refuses to touch.
pub fn is_system_path(path: &Path) -> io::Result<bool> {
    Ok(is_under_any(path, &default_guarded_roots())? || has_system_attribute(path)?)
}

/// Makes `path` absolute and folds `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> io::Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// The spellings a path is compared under: lexical, plus the fully resolved
/// form when it exists on disk.
fn resolved_forms(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut forms = vec![normalize_lexically(path)?];
    if let Ok(real) = fs::canonicalize(path) {
        if !forms.contains(&real) {
            forms.push(real);
        }
    }
    Ok(forms)
}

fn is_under_any(path: &Path, roots: &[PathBuf]) -> io::Result<bool> {
    if roots.is_empty() {
        return Ok(false);
    }
    let forms = resolved_forms(path)?;
    for root in roots {
        let root_forms = resolved_forms(root)?;
        if forms
            .iter()
            .any(|form| root_forms.iter().any(|r| form.starts_with(r)))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(not(windows))]
fn has_system_attribute(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

#[cfg(windows)]
fn has_system_attribute(path: &Path) -> io::Result<bool> {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.file_attributes() & FILE_ATTRIBUTE_SYSTEM != 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    const PASSWORD: &str = "testPassword";

    #[test]
    fn file_round_trip_at_chunk_boundaries() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        for size in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1] {
            let path = dir.path().join(format!("data-{size}.bin"));
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            fs::write(&path, &data).unwrap();

            engine.transform_file(&path, Direction::Encrypt, PASSWORD).unwrap();
            let encrypted = fs::read(&path).unwrap();
            assert_ne!(encrypted, data, "size {size} should change on encrypt");
            assert_eq!(encrypted.len() % 16, 0);

            engine.transform_file(&path, Direction::Decrypt, PASSWORD).unwrap();
            assert_eq!(fs::read(&path).unwrap(), data, "size {size} round trip");
        }
    }

    #[test]
    fn wrong_password_is_a_crypto_failure_and_leaves_ciphertext_intact() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        fs::write(&path, b"this is a test data").unwrap();

        engine.transform_file(&path, Direction::Encrypt, PASSWORD).unwrap();
        let ciphertext = fs::read(&path).unwrap();

        let err = engine
            .transform_file(&path, Direction::Decrypt, "wrongPassword")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CryptoFailure);
        assert_eq!(fs::read(&path).unwrap(), ciphertext);

        engine.transform_file(&path, Direction::Decrypt, PASSWORD).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"this is a test data");
    }

    #[test]
    fn transform_to_separate_output_creates_it() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let input = dir.path().join("plain.txt");
        let output = dir.path().join("cipher.bin");
        fs::write(&input, b"alpha").unwrap();

        engine
            .transform_file_to(&input, &output, Direction::Encrypt, PASSWORD)
            .unwrap();
        assert_eq!(fs::read(&input).unwrap(), b"alpha");
        assert_eq!(fs::read(&output).unwrap().len(), 16);
    }

    #[test]
    fn uncreatable_output_is_fatal() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let input = dir.path().join("plain.txt");
        fs::write(&input, b"alpha").unwrap();
        let output = dir.path().join("missing-dir").join("out.bin");

        let err = engine
            .transform_file_to(&input, &output, Direction::Encrypt, PASSWORD)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn directory_walk_reaches_every_depth() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        let nested = root.join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        let files = [
            root.join("top.txt"),
            root.join("a").join("one.txt"),
            root.join("a").join("b").join("two.txt"),
            nested.join("three.txt"),
        ];
        for (i, f) in files.iter().enumerate() {
            fs::write(f, format!("file number {i}")).unwrap();
        }

        let report = engine
            .transform_directory(&root, Direction::Encrypt, PASSWORD)
            .unwrap();
        assert_eq!(report.transformed.len(), files.len());
        assert!(report.is_clean());
        for (i, f) in files.iter().enumerate() {
            assert_ne!(fs::read(f).unwrap(), format!("file number {i}").into_bytes());
        }
        assert!(root.join("empty").is_dir());

        engine
            .transform_directory(&root, Direction::Decrypt, PASSWORD)
            .unwrap();
        for (i, f) in files.iter().enumerate() {
            assert_eq!(fs::read_to_string(f).unwrap(), format!("file number {i}"));
        }
    }

    #[test]
    fn expansion_is_breadth_first() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("z").join("deep")).unwrap();
        fs::write(root.join("z").join("deep").join("d.txt"), b"d").unwrap();
        fs::write(root.join("z").join("m.txt"), b"m").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let mut failures = Vec::new();
        let files = expand_directory(root, &mut failures);
        assert!(failures.is_empty());
        assert_eq!(files.len(), 3);
        assert_eq!(files[0], root.join("a.txt"));
        assert_eq!(files[2], root.join("z").join("deep").join("d.txt"));
    }

    #[test]
    fn one_bad_file_does_not_stop_the_directory() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.txt");
        let plain = dir.path().join("plain.txt");
        fs::write(&good, b"top secret").unwrap();
        fs::write(&plain, b"never encrypted").unwrap();
        engine.transform_file(&good, Direction::Encrypt, PASSWORD).unwrap();

        let report = engine
            .transform_directory(dir.path(), Direction::Decrypt, PASSWORD)
            .unwrap();
        assert_eq!(report.transformed, vec![good.clone()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, plain);
        assert_eq!(fs::read(&good).unwrap(), b"top secret");
        assert_eq!(fs::read(&plain).unwrap(), b"never encrypted");
    }

    #[test]
    fn missing_target_is_not_found() {
        let engine = Engine::new();
        let dir = tempdir().unwrap();
        let err = engine
            .transform_path(&dir.path().join("nope"), Direction::Encrypt, PASSWORD)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn system_prefixes_are_guarded_by_component() {
        assert!(is_system_path(Path::new("/etc/passwd")).unwrap());
        assert!(is_system_path(Path::new("/usr/bin/env")).unwrap());
        assert!(!is_system_path(Path::new("/home/user/etc/notes.txt")).unwrap());
        assert!(!is_system_path(Path::new("/etcetera/file")).unwrap());

        let err = Engine::new()
            .transform_path(Path::new("/etc"), Direction::Encrypt, PASSWORD)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityViolation);
    }

    #[cfg(unix)]
    #[test]
    fn parent_components_do_not_escape_the_guard() {
        assert!(is_system_path(Path::new("/tmp/../etc/passwd")).unwrap());
        assert!(is_system_path(Path::new("/usr/local/../bin/env")).unwrap());
        assert!(!is_system_path(Path::new("/etc/../tmp/notes.txt")).unwrap());
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c/")).unwrap(),
            PathBuf::from("/a/c")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_into_a_guarded_directory_is_refused() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("cfg");
        std::os::unix::fs::symlink("/etc", &link).unwrap();

        assert!(is_system_path(&link).unwrap());
        let engine = Engine::new();
        for direction in [Direction::Encrypt, Direction::Decrypt] {
            let err = engine.transform_path(&link, direction, PASSWORD).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SecurityViolation);
        }
    }

    #[test]
    fn guarded_files_inside_a_walk_are_skipped() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        let locked = tree.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::create_dir_all(tree.join("sub")).unwrap();
        let open = tree.join("open.txt");
        let secret = locked.join("secret.txt");
        fs::write(&open, b"alpha").unwrap();
        fs::write(&secret, b"top secret").unwrap();

        let engine = Engine::new().with_guarded_roots([locked.clone()]);
        let report = engine
            .transform_directory(&tree, Direction::Encrypt, PASSWORD)
            .unwrap();
        assert_eq!(report.transformed, vec![open.clone()]);
        assert_eq!(report.skipped, vec![secret.clone()]);
        assert!(!report.is_clean());
        assert_eq!(fs::read(&secret).unwrap(), b"top secret");
        assert_ne!(fs::read(&open).unwrap(), b"alpha");

        let sneaky = tree.join("sub").join("..").join("locked").join("secret.txt");
        let err = engine
            .transform_file(&sneaky, Direction::Encrypt, PASSWORD)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityViolation);

        #[cfg(unix)]
        {
            let alias = dir.path().join("alias");
            std::os::unix::fs::symlink(&locked, &alias).unwrap();
            let err = engine
                .transform_file(&alias.join("secret.txt"), Direction::Encrypt, PASSWORD)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SecurityViolation);
        }
        assert_eq!(fs::read(&secret).unwrap(), b"top secret");
    }
}
