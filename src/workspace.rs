use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

use crate::formats::{Item, LabeledItem};

pub const DEFAULT_WATERMARK: &str = "1970-01-01T00:00:00.000Z";

/// File layout of a pipeline data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub watermark: PathBuf,
    pub raw_items: PathBuf,
    pub new_items: PathBuf,
    pub label_store: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            watermark: data_dir.join("last_update.txt"),
            raw_items: data_dir.join("raw_posts.json"),
            new_items: data_dir.join("new_posts.json"),
            label_store: data_dir.join("labeled_posts.json"),
        }
    }
}

pub async fn read_watermark(path: &Path) -> anyhow::Result<String> {
    match fs::read_to_string(path).await {
        Ok(contents) if !contents.trim().is_empty() => Ok(contents.trim().to_owned()),
        Ok(_) => Ok(DEFAULT_WATERMARK.to_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(DEFAULT_WATERMARK.to_owned())
        }
        Err(err) => Err(err).with_context(|| format!("read watermark: {}", path.display())),
    }
}

pub async fn write_watermark(path: &Path, watermark: &str) -> anyhow::Result<()> {
    ensure_parent_dir(path).await?;
    fs::write(path, watermark)
        .await
        .with_context(|| format!("write watermark: {}", path.display()))
}

/// Reads an item file. A missing file is an error: every caller needs the previous
/// stage to have run.
pub async fn read_items(path: &Path) -> anyhow::Result<Vec<Item>> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("read items: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse items: {}", path.display()))
}

/// Writes `value` as indented JSON through a temp file and a rename, so readers never
/// observe a half-written file.
pub async fn write_json_atomic<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    ensure_parent_dir(path).await?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

async fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }
    Ok(())
}

/// The append-only label store, held in memory and rewritten in full on every append.
#[derive(Debug)]
pub struct LabelStore {
    path: PathBuf,
    items: Vec<LabeledItem>,
    urls: HashSet<String>,
}

impl LabelStore {
    /// Opens the store at `path`; a missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let items = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<LabeledItem>>(&bytes)
                .with_context(|| format!("parse label store: {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read label store: {}", path.display()));
            }
        };
        let urls = items.iter().map(|item| item.url.clone()).collect();
        Ok(Self { path, items, urls })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn items(&self) -> &[LabeledItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends one entry and persists the whole store before returning.
    pub async fn append(&mut self, item: LabeledItem) -> anyhow::Result<()> {
        self.urls.insert(item.url.clone());
        self.items.push(item);
        write_json_atomic(&self.path, &self.items)
            .await
            .with_context(|| format!("persist label store: {}", self.path.display()))
    }
}
