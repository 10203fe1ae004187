//! CPU model name lookup in /proc/cpuinfo
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::constants::MODEL_NAME_LABEL;
use crate::error::{HostInfoError, Result};

/// Return the value of the first "model name" line, trailing newline included.
pub fn read_cpu_name(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|source| HostInfoError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    find_labeled_value(BufReader::new(file), MODEL_NAME_LABEL)
        .map_err(|source| HostInfoError::FileClose {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| HostInfoError::FieldNotFound {
            label: MODEL_NAME_LABEL,
            path: path.to_path_buf(),
        })
}

/// Scan lines until one starts with `label` and return what follows its colon.
///
/// `Ok(None)` when the input runs out first, or when the labeled line has no colon.
fn find_labeled_value<R: BufRead>(mut reader: R, label: &str) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.starts_with(label) {
            return Ok(value_after_colon(&line).map(str::to_owned));
        }
    }
}

/// Text after the first colon, skipping the single separator character.
fn value_after_colon(line: &str) -> Option<&str> {
    let rest = &line[line.find(':')? + 1..];
    let mut chars = rest.chars();
    chars.next();
    Some(chars.as_str())
}
