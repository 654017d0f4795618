//! Parameter persistence backed by a JSON file, write-through.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rs3411::params::KvStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    entries: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct FileKv {
    path: Option<PathBuf>,
    contents: FileContents,
}

impl FileKv {
    pub fn open(path: Option<PathBuf>) -> Self {
        let contents = path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self { path, contents }
    }

    fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match serde_json::to_string_pretty(&self.contents) {
            Ok(text) => {
                if let Err(err) = std::fs::write(path, text) {
                    warn!(%err, "failed to persist parameters");
                }
            }
            Err(err) => warn!(%err, "failed to serialise parameters"),
        }
    }
}

impl KvStore for FileKv {
    fn load(&mut self, name: &str) -> Option<Vec<u8>> {
        self.contents.entries.get(name).cloned()
    }

    fn save(&mut self, name: &str, data: &[u8]) {
        self.contents
            .entries
            .insert(name.to_string(), data.to_vec());
        self.flush();
    }

    fn erase(&mut self, name: &str) {
        self.contents.entries.remove(name);
        self.flush();
    }
}
