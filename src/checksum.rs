use std::collections::BTreeMap;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};
use serde::Serialize;

use crate::error::BdsError;
use crate::storage::{NodePath, Storage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checksum {
    pub md5: String,
    pub path: Utf8PathBuf,
}

pub fn md5_of(storage: &Storage, path: &NodePath) -> Result<String, BdsError> {
    let mut file = storage.open_file(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| BdsError::Storage(format!("read {path}: {err}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checksums of every file below `dir`, with paths relative to `dir`,
/// sorted by path.
pub fn compute(storage: &Storage, dir: &NodePath) -> Result<Vec<Checksum>, BdsError> {
    let mut checksums = Vec::new();
    for node in storage.walk_files(dir)? {
        let relative = node
            .path()
            .strip_prefix(dir)
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| BdsError::Storage(format!("{} is not below {dir}", node.path())))?;
        checksums.push(Checksum {
            md5: md5_of(storage, node.path())?,
            path: relative,
        });
    }
    checksums.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(checksums)
}

/// `"<md5>  <relative-path>"`, one line per file.
pub fn format_checksums(checksums: &[Checksum]) -> String {
    checksums
        .iter()
        .map(|checksum| format!("{}  {}\n", checksum.md5, checksum.path))
        .collect()
}

pub fn parse_checksums(content: &str) -> Result<Vec<Checksum>, BdsError> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (md5, path) = line.split_once("  ").ok_or_else(|| {
                BdsError::DataStructure(format!("malformed checksum line: {line}"))
            })?;
            let valid = md5.len() == 32 && md5.chars().all(|ch| ch.is_ascii_hexdigit());
            if !valid || path.is_empty() {
                return Err(BdsError::DataStructure(format!(
                    "malformed checksum line: {line}"
                )));
            }
            Ok(Checksum {
                md5: md5.to_ascii_lowercase(),
                path: Utf8PathBuf::from(path),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChecksumReport {
    pub checked: usize,
    pub missing: Vec<Utf8PathBuf>,
    pub unexpected: Vec<Utf8PathBuf>,
    pub mismatched: Vec<Utf8PathBuf>,
}

impl ChecksumReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

pub fn compare(expected: &[Checksum], actual: &[Checksum]) -> ChecksumReport {
    let expected = expected
        .iter()
        .map(|checksum| (&checksum.path, &checksum.md5))
        .collect::<BTreeMap<_, _>>();
    let actual = actual
        .iter()
        .map(|checksum| (&checksum.path, &checksum.md5))
        .collect::<BTreeMap<_, _>>();

    let mut report = ChecksumReport {
        checked: expected.len(),
        ..ChecksumReport::default()
    };
    for (path, md5) in &expected {
        match actual.get(path) {
            None => report.missing.push((*path).clone()),
            Some(found) if found != md5 => report.mismatched.push((*path).clone()),
            Some(_) => {}
        }
    }
    for path in actual.keys() {
        if !expected.contains_key(path) {
            report.unexpected.push((*path).clone());
        }
    }
    report
}
