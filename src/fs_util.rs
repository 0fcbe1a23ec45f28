use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use serde::Serialize;

use crate::error::ConnectorError;

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ConnectorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
    }
    let tmp_path = match path.extension() {
        Some(ext) => path.with_extension(format!("{ext}.tmp")),
        None => path.with_extension("tmp"),
    };
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), ConnectorError> {
    let content = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &content)
}

/// Regular files below `root`, sorted by path. Symlinks are not followed; a missing root yields nothing.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ConnectorError> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
            let file_type = entry
                .file_type()
                .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub fn tail_lines(path: &Path, count: usize) -> Result<Vec<String>, ConnectorError> {
    let file = fs::File::open(path).map_err(|_| ConnectorError::FileRead(path.to_path_buf()))?;
    let mut lines = VecDeque::with_capacity(count);
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        if lines.len() == count {
            lines.pop_front();
        }
        lines.push_back(line);
    }
    Ok(lines.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("output.log");
        let content = (1..=150).map(|i| format!("line {i}\n")).collect::<String>();
        fs::write(&path, content).unwrap();

        let tail = tail_lines(&path, 100).unwrap();
        assert_eq!(tail.len(), 100);
        assert_eq!(tail[0], "line 51");
        assert_eq!(tail[99], "line 150");
    }

    #[test]
    fn walk_lists_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/c.txt"), "x").unwrap();
        fs::write(temp.path().join("top.txt"), "y").unwrap();
        let files = walk_files(temp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(walk_files(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn walk_does_not_follow_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("runs.csv"), "x").unwrap();
        std::os::unix::fs::symlink(temp.path(), temp.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("runs.csv"), temp.path().join("alias.csv")).unwrap();

        let files = walk_files(temp.path()).unwrap();
        assert_eq!(files, vec![temp.path().join("runs.csv")]);
    }
}
