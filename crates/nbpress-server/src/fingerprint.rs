//! Content fingerprints for change detection.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::server::ServerError;

/// Content hash of every watched file, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, blake3::Hash>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&blake3::Hash> {
        self.files.get(path)
    }

    /// Paths added, removed or modified between `self` and `newer`, sorted.
    pub fn changed_paths(&self, newer: &Snapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = newer
            .files
            .iter()
            .filter(|(path, hash)| self.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();

        changed.extend(
            self.files
                .keys()
                .filter(|path| !newer.files.contains_key(*path))
                .cloned(),
        );

        changed.sort();
        changed
    }

    fn merge(&mut self, other: Snapshot) {
        self.files.extend(other.files);
    }
}

/// Hash every file under `root` whose extension is in `extensions`.
///
/// Extensions match case-insensitively and an empty list matches every file.
/// Hidden entries and the `ignored` directories are skipped. Files that
/// disappear while the snapshot is taken are left out.
pub fn snapshot(
    root: &Path,
    extensions: &[String],
    ignored: &[PathBuf],
) -> Result<Snapshot, ServerError> {
    if !root.is_dir() {
        return Err(ServerError::Fingerprint {
            path: root.to_path_buf(),
            message: "directory not found".to_string(),
        });
    }

    let ignored: Vec<PathBuf> = ignored
        .iter()
        .filter_map(|path| path.canonicalize().ok())
        .collect();

    let paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let hidden = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.'));
            let skipped = entry.file_type().is_dir()
                && !ignored.is_empty()
                && entry
                    .path()
                    .canonicalize()
                    .is_ok_and(|path| ignored.contains(&path));
            !hidden && !skipped
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| matches_extension(path, extensions))
        .collect();

    let hashed: Vec<Option<(PathBuf, blake3::Hash)>> = paths
        .into_par_iter()
        .map(|path| match fs::read(&path) {
            Ok(bytes) => Ok(Some((path, blake3::hash(&bytes)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerError::Fingerprint {
                path,
                message: e.to_string(),
            }),
        })
        .collect::<Result<_, _>>()?;

    Ok(Snapshot {
        files: hashed.into_iter().flatten().collect(),
    })
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Tracks the last snapshot of a set of roots.
#[derive(Debug)]
pub struct ChangeDetector {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    ignored: Vec<PathBuf>,
    previous: Snapshot,
}

impl ChangeDetector {
    pub fn new(roots: Vec<PathBuf>, extensions: Vec<String>, ignored: Vec<PathBuf>) -> Self {
        Self {
            roots,
            extensions,
            ignored,
            previous: Snapshot::default(),
        }
    }

    /// Record the current state without reporting changes.
    pub fn prime(&mut self) -> Result<(), ServerError> {
        self.previous = self.take_snapshot()?;
        Ok(())
    }

    /// Take a new snapshot, replace the stored one and return what changed.
    ///
    /// On error the stored snapshot is kept, so the next poll compares
    /// against the last good state.
    pub fn poll(&mut self) -> Result<Vec<PathBuf>, ServerError> {
        let current = self.take_snapshot()?;
        let changed = self.previous.changed_paths(&current);
        self.previous = current;
        Ok(changed)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.previous
    }

    /// Roots that do not exist are skipped; resources are optional.
    fn take_snapshot(&self) -> Result<Snapshot, ServerError> {
        let mut combined = Snapshot::default();
        for root in self.roots.iter().filter(|root| root.is_dir()) {
            combined.merge(snapshot(root, &self.extensions, &self.ignored)?);
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unchanged_tree_has_equal_snapshots() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.ipynb"), "{}").unwrap();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.css"), "body{}").unwrap();

        let first = snapshot(temp.path(), &[], &[]).unwrap();
        let second = snapshot(temp.path(), &[], &[]).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.changed_paths(&second).is_empty());
    }

    #[test]
    fn reports_single_modified_file() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.ipynb");
        let b = temp.path().join("b.ipynb");
        fs::write(&a, "one").unwrap();
        fs::write(&b, "two").unwrap();

        let before = snapshot(temp.path(), &[], &[]).unwrap();
        fs::write(&a, "changed").unwrap();
        let after = snapshot(temp.path(), &[], &[]).unwrap();

        assert_ne!(before, after);
        assert_eq!(before.changed_paths(&after), vec![a]);
    }

    #[test]
    fn reports_added_and_removed_files() {
        let temp = tempdir().unwrap();
        let old = temp.path().join("old.ipynb");
        let new = temp.path().join("new.ipynb");
        fs::write(&old, "x").unwrap();

        let before = snapshot(temp.path(), &[], &[]).unwrap();
        fs::remove_file(&old).unwrap();
        fs::write(&new, "y").unwrap();
        let after = snapshot(temp.path(), &[], &[]).unwrap();

        assert_eq!(before.changed_paths(&after), vec![new, old]);
    }

    #[test]
    fn filters_extensions_hidden_and_ignored() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("keep.IPYNB"), "x").unwrap();
        fs::write(root.join("skip.txt"), "x").unwrap();
        fs::create_dir_all(root.join(".ipynb_checkpoints")).unwrap();
        fs::write(root.join(".ipynb_checkpoints/keep-checkpoint.ipynb"), "x").unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/out.ipynb"), "x").unwrap();

        let snap = snapshot(root, &exts(&["ipynb"]), &[root.join("build")]).unwrap();

        assert_eq!(snap.len(), 1);
        assert!(snap.get(&root.join("keep.IPYNB")).is_some());
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempdir().unwrap();
        assert!(snapshot(&temp.path().join("missing"), &[], &[]).is_err());
    }

    #[test]
    fn detector_reports_each_change_once() {
        let temp = tempdir().unwrap();
        let notebooks = temp.path().join("notebooks");
        fs::create_dir_all(&notebooks).unwrap();
        let file = notebooks.join("a.ipynb");
        fs::write(&file, "v1").unwrap();

        let mut detector = ChangeDetector::new(
            vec![notebooks.clone(), temp.path().join("resources")],
            exts(&["ipynb"]),
            vec![],
        );
        detector.prime().unwrap();
        assert!(detector.poll().unwrap().is_empty());

        fs::write(&file, "v2").unwrap();
        assert_eq!(detector.poll().unwrap(), vec![file]);
        assert!(detector.poll().unwrap().is_empty());
        assert_eq!(detector.snapshot().len(), 1);
    }
}
