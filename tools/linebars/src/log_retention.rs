use crate::errors::LinebarsError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// The active log is rotated once it reaches this share of the disk budget.
pub const ROTATION_SEGMENTS: u64 = 4;

pub fn segment_bytes(budget_bytes: u64) -> u64 {
    (budget_bytes / ROTATION_SEGMENTS).max(1)
}

/// Rotated segments of `log_path`, oldest first.
///
/// Only `<stem>.<digits>.<ext>` siblings belong to the log; nothing else in the
/// directory is ever listed, so nothing else is ever pruned.
pub fn rotated_segments(log_path: &Path) -> Result<Vec<PathBuf>, LinebarsError> {
    let Some(dir) = log_path.parent() else {
        return Ok(Vec::new());
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let mut segments = fs::read_dir(dir)
        .map_err(|e| LinebarsError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| segment_sequence(log_path, &path).map(|seq| (seq, path)))
        .collect::<Vec<_>>();
    segments.sort();
    Ok(segments.into_iter().map(|(_, path)| path).collect())
}

fn segment_sequence(log_path: &Path, candidate: &Path) -> Option<u128> {
    let stem = log_path.file_stem()?.to_str()?;
    let name = candidate.file_name()?.to_str()?;
    let rest = name.strip_prefix(stem)?.strip_prefix('.')?;
    let digits = match log_path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => rest.strip_suffix(ext)?.strip_suffix('.')?,
        None => rest,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn segment_path(log_path: &Path, sequence: u128) -> PathBuf {
    let stem = log_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match log_path.extension() {
        Some(ext) => format!("{stem}.{sequence}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{sequence}"),
    };
    log_path.with_file_name(name)
}

/// Move the active log aside as a numbered segment once it holds `max_bytes` or more.
pub fn rotate_if_oversized(
    log_path: &Path,
    max_bytes: u64,
) -> Result<Option<PathBuf>, LinebarsError> {
    let len = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(None),
    };
    if len < max_bytes {
        return Ok(None);
    }
    let mut sequence = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    if let Some(newest) = rotated_segments(log_path)?
        .last()
        .and_then(|path| segment_sequence(log_path, path))
    {
        sequence = sequence.max(newest + 1);
    }
    let target = segment_path(log_path, sequence);
    fs::rename(log_path, &target).map_err(|e| LinebarsError::Io(e.to_string()))?;
    Ok(Some(target))
}

/// Delete the oldest rotated segments of `log_path` until the log and its segments
/// fit `budget_bytes`. The active log itself is never deleted.
pub fn enforce_total_budget(
    log_path: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, LinebarsError> {
    let segments = rotated_segments(log_path)?;
    let active = fs::metadata(log_path).map(|meta| meta.len()).unwrap_or(0);
    let mut total = segments
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>()
        + active;

    let mut deleted = Vec::new();
    for path in segments {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| LinebarsError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| LinebarsError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}
