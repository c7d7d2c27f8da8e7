//! File I/O utilities with atomic writes
//!
//! Readers in another process see either the old or the new file, never a
//! torn one: data goes to a temp file in the same directory, is synced, and
//! is then renamed over the target.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::PostbookError;

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, PostbookError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let Some(reader) = open_if_exists(path)? else {
        return Ok(T::default());
    };

    serde_json::from_reader(reader)
        .map_err(|e| PostbookError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Read YAML from a file, returning a default value if file doesn't exist
pub fn read_yaml<T, P>(path: P) -> Result<T, PostbookError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let Some(reader) = open_if_exists(path)? else {
        return Ok(T::default());
    };

    serde_yaml::from_reader(reader)
        .map_err(|e| PostbookError::Yaml(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write pretty JSON to a file atomically
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), PostbookError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_json::to_writer_pretty(writer, data)
            .map_err(|e| PostbookError::Storage(format!("Failed to serialize data: {}", e)))
    })
}

/// Write YAML to a file atomically
pub fn write_yaml_atomic<T, P>(path: P, data: &T) -> Result<(), PostbookError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_yaml::to_writer(writer, data)
            .map_err(|e| PostbookError::Yaml(format!("Failed to serialize data: {}", e)))
    })
}

fn open_if_exists(path: &Path) -> Result<Option<BufReader<File>>, PostbookError> {
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PostbookError::Storage(format!(
            "Failed to open {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_atomic<F>(path: &Path, serialize: F) -> Result<(), PostbookError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), PostbookError>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PostbookError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);

    let file = File::create(&temp_path)
        .map_err(|e| PostbookError::Storage(format!("Failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);

    let written = serialize(&mut writer).and_then(|_| {
        writer
            .flush()
            .map_err(|e| PostbookError::Storage(format!("Failed to flush data: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| PostbookError::Storage(format!("Failed to sync data: {}", e)))
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        PostbookError::Storage(format!("Failed to rename temp file: {}", e))
    })
}

/// Temp files carry the pid so two processes never share one
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}
