use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use surface_core::filter::Operation;
use surface_core::platform::platform_name;
use surface_core::{CollectContext, Collector, Emitter, FileSystemObject, Filter, ResultType};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Walks a set of roots and records every file and directory.
#[derive(Debug, Clone)]
pub struct FileSystemCollector {
    roots: Vec<PathBuf>,
    hash_contents: bool,
    workers: usize,
}

impl FileSystemCollector {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self { roots, hash_contents: false, workers }
    }

    pub fn with_hashing(mut self, on: bool) -> Self {
        self.hash_contents = on;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn default_roots() -> Vec<PathBuf> {
        if cfg!(windows) {
            vec![PathBuf::from("C:\\")]
        } else {
            vec![PathBuf::from("/")]
        }
    }

    fn walk(&self, filter: &Filter) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
                // prune filtered directories instead of visiting their contents
                !e.file_type().is_dir() || !path_filtered(filter, e.path())
            });
            for entry in walker {
                match entry {
                    Ok(e) => paths.push(e.into_path()),
                    Err(err) => debug!(error = %err, "walk error"),
                }
            }
        }
        paths
    }
}

fn path_filtered(filter: &Filter, path: &Path) -> bool {
    filter.is_filtered(
        platform_name(),
        Operation::Scan,
        ResultType::File.filter_name(),
        "Path",
        &path.to_string_lossy(),
    )
}

impl Collector for FileSystemCollector {
    fn name(&self) -> &'static str {
        "file_system"
    }

    fn kind(&self) -> ResultType {
        ResultType::File
    }

    fn can_run_on_platform(&self) -> bool {
        true
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        let paths = self.walk(ctx.filter);
        info!(run_id = ctx.run_id, paths = paths.len(), hashing = self.hash_contents, "walked file system");
        if paths.is_empty() {
            return Ok(());
        }

        let chunk = paths.len().div_ceil(self.workers).max(1);
        let hash = self.hash_contents;
        let (tx, rx) = mpsc::channel::<FileSystemObject>();
        thread::scope(|s| {
            for part in paths.chunks(chunk) {
                let tx = tx.clone();
                s.spawn(move || {
                    for path in part {
                        match file_object(path, hash) {
                            Ok(obj) => {
                                if tx.send(obj).is_err() {
                                    return;
                                }
                            }
                            Err(e) => debug!(path = %path.display(), error = %e, "stat failed"),
                        }
                    }
                });
            }
            drop(tx);
            for obj in rx {
                out.emit(obj);
            }
        });
        Ok(())
    }
}

/// Builds the record for one path. Symlinks are described, not followed.
pub fn file_object(path: &Path, hash: bool) -> Result<FileSystemObject> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let content_hash = if hash && meta.is_file() {
        Some(hash_file(path)?)
    } else {
        None
    };
    Ok(FileSystemObject {
        path: path.to_string_lossy().into_owned(),
        permissions: Some(permissions(&meta)),
        owner: owner(&meta),
        size: meta.is_file().then(|| meta.len()),
        is_directory: meta.is_dir(),
        content_hash,
    })
}

/// Streaming SHA-256 of a file, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(f);
    let mut sha = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
    }
    Ok(hex::encode(sha.finalize()))
}

#[cfg(unix)]
fn permissions(meta: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:04o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions(meta: &Metadata) -> String {
    if meta.permissions().readonly() { "ReadOnly" } else { "ReadWrite" }.to_string()
}

#[cfg(unix)]
fn owner(meta: &Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner(_meta: &Metadata) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use surface_core::{Record, RecordSink};

    fn collect(dir: &Path, filter: &Filter, hash: bool) -> Vec<Record> {
        let collector = FileSystemCollector::new(vec![dir.to_path_buf()]).with_hashing(hash).with_workers(3);
        let mut sink: Vec<Record> = Vec::new();
        let ctx = CollectContext { run_id: "t", filter };
        {
            let mut out = Emitter::new(ResultType::File, filter, &mut sink as &mut dyn RecordSink);
            collector.collect(&ctx, &mut out).unwrap();
        }
        sink
    }

    fn path_of(r: &Record) -> String {
        match r {
            Record::File(f) => f.path.clone(),
            other => panic!("not a file record: {other:?}"),
        }
    }

    #[test]
    fn collects_every_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for i in 0..10 {
            fs::write(dir.path().join("sub").join(format!("f{i}")), b"x").unwrap();
        }
        let recs = collect(dir.path(), &Filter::empty(), false);
        // root + sub + 10 files
        assert_eq!(recs.len(), 12);
        let mut paths: Vec<_> = recs.iter().map(path_of).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 12);
    }

    #[test]
    fn hashes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("hello.txt");
        fs::write(&f, b"hello").unwrap();
        let obj = file_object(&f, true).unwrap();
        assert_eq!(
            obj.content_hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(obj.size, Some(5));
        assert!(!obj.is_directory);
        assert!(file_object(dir.path(), true).unwrap().content_hash.is_none());
    }

    #[test]
    fn filtered_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("skip")).unwrap();
        fs::write(dir.path().join("skip").join("inner"), b"x").unwrap();
        fs::write(dir.path().join("keep"), b"x").unwrap();
        let filter =
            Filter::from_json(r#"{"*":{"Scan":{"File":{"Path":{"Exclude":["skip"]}}}}}"#).unwrap();
        let recs = collect(dir.path(), &filter, false);
        assert!(recs.iter().all(|r| !path_of(r).contains("skip")));
        assert!(recs.iter().any(|r| path_of(r).ends_with("keep")));
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_octal() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("p");
        fs::write(&f, b"").unwrap();
        fs::set_permissions(&f, fs::Permissions::from_mode(0o640)).unwrap();
        assert_eq!(file_object(&f, false).unwrap().permissions.as_deref(), Some("0640"));
    }
}
