//! `LIST_DIR`: one `DATA` frame carrying a packed list of directory entries.
//!
//! Wire format: `count(4, LE, signed i32) ‖ entry*`, each entry
//! `type(1; 0=file, 1=dir) ‖ name_len(2, LE) ‖ name(name_len) ‖ size(8, LE) ‖ mtime(8, LE seconds)`.

use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::DaemonError;

/// Output is capped at this many bytes; entries beyond the cap are
/// silently dropped rather than erroring, per the protocol design.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Builds the packed-entry payload for `path`. An `opendir`-equivalent
/// failure (path missing, not a directory, permission denied) yields the
/// empty listing (`count = 0`) rather than an error, matching the wire
/// contract exactly.
pub async fn list_dir(path: &Path) -> Vec<u8> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || list_dir_blocking(&path))
        .await
        .unwrap_or_else(|_| empty_listing())
}

fn empty_listing() -> Vec<u8> {
    0i32.to_le_bytes().to_vec()
}

fn list_dir_blocking(path: &Path) -> Vec<u8> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return empty_listing();
    };

    let mut packed_entries = Vec::new();
    let mut count: i32 = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == "." || name == ".." {
            continue;
        }

        let Ok(metadata) = entry.metadata() else { continue };
        let is_dir = metadata.is_dir();
        let size = if is_dir { 0 } else { metadata.len() };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        let mut packed = Vec::with_capacity(1 + 2 + name.len() + 8 + 8);
        packed.push(u8::from(is_dir));
        packed.extend_from_slice(&(name.len() as u16).to_le_bytes());
        packed.extend_from_slice(name.as_bytes());
        packed.extend_from_slice(&size.to_le_bytes());
        packed.extend_from_slice(&mtime.to_le_bytes());

        if packed_entries.len() + packed.len() > MAX_PAYLOAD_BYTES {
            break;
        }

        packed_entries.extend_from_slice(&packed);
        count += 1;
    }

    let mut payload = Vec::with_capacity(4 + packed_entries.len());
    payload.extend_from_slice(&count.to_le_bytes());
    payload.extend_from_slice(&packed_entries);
    payload
}

/// Parses `LIST_DIR`'s request payload (a NUL-terminated path).
pub fn parse_request(payload: &[u8]) -> Result<String, DaemonError> {
    let (path, _rest) = crate::wire::split_nul_terminated(payload)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_directory_has_zero_count() {
        let dir = tempdir().unwrap();
        let payload = list_dir(dir.path()).await;
        assert_eq!(payload, 0i32.to_le_bytes());
    }

    #[tokio::test]
    async fn missing_directory_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let payload = list_dir(&dir.path().join("nope")).await;
        assert_eq!(payload, 0i32.to_le_bytes());
    }

    #[tokio::test]
    async fn lists_a_file_and_a_subdirectory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let payload = list_dir(dir.path()).await;
        let count = i32::from_le_bytes(payload[0..4].try_into().unwrap());
        assert_eq!(count, 2);

        // Walk the packed entries to confirm both names show up, since
        // read_dir order isn't guaranteed.
        let mut offset = 4;
        let mut names = Vec::new();
        while offset < payload.len() {
            let _entry_type = payload[offset];
            let name_len = u16::from_le_bytes(payload[offset + 1..offset + 3].try_into().unwrap()) as usize;
            let name_start = offset + 3;
            let name = String::from_utf8(payload[name_start..name_start + name_len].to_vec()).unwrap();
            names.push(name);
            offset = name_start + name_len + 16;
        }
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"sub".to_string()));
    }
}
