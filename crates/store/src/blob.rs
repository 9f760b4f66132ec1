use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

const COLLECTION_KEY: &str = "invoices";

/// Durable home of the serialized invoice collection. Whole-collection
/// load/save semantics: the in-memory store is authoritative for the
/// session, the blob only has to survive restarts.
pub trait InvoiceBlob: Send + Sync {
    fn load_all(&self) -> Result<Option<String>>;
    fn save_all(&self, serialized: &str) -> Result<()>;
}

/// Sled-backed blob: the whole collection JSON under one key.
pub struct SledBlob {
    tree: sled::Tree,
}

impl SledBlob {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("failed to open invoice db {path}"))?;
        let tree = db.open_tree("invoices")?;
        Ok(Self { tree })
    }
}

impl InvoiceBlob for SledBlob {
    fn load_all(&self) -> Result<Option<String>> {
        let bytes = self.tree.get(COLLECTION_KEY)?;
        Ok(match bytes {
            Some(bytes) => Some(String::from_utf8(bytes.to_vec()).context("corrupt invoice blob")?),
            None => None,
        })
    }

    fn save_all(&self, serialized: &str) -> Result<()> {
        self.tree.insert(COLLECTION_KEY, serialized.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Volatile blob for tests and ephemeral sessions. Clones share contents,
/// which lets a test reopen a "second session" over the same blob.
#[derive(Clone, Default)]
pub struct MemoryBlob {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(serialized: &str) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(serialized.to_string()))),
        }
    }
}

impl InvoiceBlob for MemoryBlob {
    fn load_all(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().unwrap().clone())
    }

    fn save_all(&self, serialized: &str) -> Result<()> {
        *self.contents.lock().unwrap() = Some(serialized.to_string());
        Ok(())
    }
}
