//! Scraped evidence documents
//!
//! Documents are produced by the scraper and never modified here. The core
//! needs two calls from the store: list what exists for an account and read
//! one document's rows.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::paths::escape_component;
use crate::error::{PostbookError, PostbookResult};
use crate::models::{AccountLocator, Document};

const META_SUFFIX: &str = ".meta.json";

/// Read-only access to evidence documents
pub trait DocumentStore: Send + Sync {
    /// Documents available for an account, ordered by name
    fn list(&self, account: &AccountLocator) -> PostbookResult<Vec<Document>>;

    /// Raw cell values of every row, header rows included
    fn read_rows(
        &self,
        account: &AccountLocator,
        document: &str,
        delimiter: u8,
    ) -> PostbookResult<Vec<Vec<String>>>;
}

/// Document store over `documents/<login>/<label>/<name>`
///
/// An optional `<name>.meta.json` sidecar supplies [`Document`] metadata;
/// without one, the file's modification time stands in for the scrape time.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn account_dir(&self, account: &AccountLocator) -> PathBuf {
        self.root
            .join(escape_component(&account.login))
            .join(escape_component(&account.label))
    }

    fn document_path(&self, account: &AccountLocator, document: &str) -> PostbookResult<PathBuf> {
        let plain = !document.is_empty()
            && !document.starts_with('.')
            && !document.contains(&['/', '\\'][..]);
        if !plain {
            return Err(PostbookError::document_not_found(format!("{}/{}", account, document)));
        }
        Ok(self.account_dir(account).join(document))
    }

    fn metadata_for(&self, path: &Path, name: &str) -> PostbookResult<Document> {
        let sidecar = path.with_file_name(format!("{}{}", name, META_SUFFIX));
        if sidecar.exists() {
            let file = File::open(&sidecar)?;
            let mut doc: Document = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                PostbookError::Json(format!("Bad metadata {}: {}", sidecar.display(), e))
            })?;
            doc.name = name.to_string();
            return Ok(doc);
        }

        let scraped_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Document::new(name, scraped_at))
    }
}

impl DocumentStore for FsDocumentStore {
    fn list(&self, account: &AccountLocator) -> PostbookResult<Vec<Document>> {
        let dir = self.account_dir(account);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(META_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        names
            .iter()
            .map(|name| self.metadata_for(&dir.join(name), name))
            .collect()
    }

    fn read_rows(
        &self,
        account: &AccountLocator,
        document: &str,
        delimiter: u8,
    ) -> PostbookResult<Vec<Vec<String>>> {
        let path = self.document_path(account, document)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PostbookError::document_not_found(format!("{}/{}", account, document)))
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(BufReader::new(file));

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                PostbookError::Csv(format!("{}/{}: {}", account, document, e))
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        debug!(account = %account, document, rows = rows.len(), "read document");
        Ok(rows)
    }
}

/// Bounds every call of an inner store by a timeout
///
/// The call runs on a worker thread; when the deadline passes the caller gets
/// `Timeout` and the worker's eventual result is dropped.
pub struct TimedDocumentStore {
    inner: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TimedDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn run<T, F>(&self, what: String, call: F) -> PostbookResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DocumentStore) -> PostbookResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("document-store".into())
            .spawn(move || {
                let _ = tx.send(call(inner.as_ref()));
            })
            .map_err(|e| PostbookError::Io(format!("Failed to start document store call: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PostbookError::Timeout(format!(
                "{} took longer than {}ms",
                what,
                self.timeout.as_millis()
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(PostbookError::Storage(format!("{} worker exited without a result", what)))
            }
        }
    }
}

impl DocumentStore for TimedDocumentStore {
    fn list(&self, account: &AccountLocator) -> PostbookResult<Vec<Document>> {
        let owned = account.clone();
        self.run(format!("listing documents of {}", account), move |store| {
            store.list(&owned)
        })
    }

    fn read_rows(
        &self,
        account: &AccountLocator,
        document: &str,
        delimiter: u8,
    ) -> PostbookResult<Vec<Vec<String>>> {
        let owned = account.clone();
        let name = document.to_string();
        self.run(format!("reading {}/{}", account, document), move |store| {
            store.read_rows(&owned, &name, delimiter)
        })
    }
}
