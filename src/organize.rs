use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::{OrganizeArgs, StoreKind};
use crate::formats::LabeledItem;
use crate::retry::{self, RetryPolicy, Sleeper, TokioSleeper};
use crate::storage::{
    DocumentStore, DriveStore, GOOGLE_DOC_MIME, LocalFsStore, StorageError, TokenSource,
    ensure_folder,
};
use crate::taxonomy::{SubjectTaxonomy, normalize_subject};
use crate::workspace::{DataPaths, LabelStore};

/// Category index bucket. Only `Course` and `Exam` get their own; everything else,
/// sentinel labels included, is filed under `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CategoryBucket {
    Courses,
    Exams,
    Other,
}

impl CategoryBucket {
    pub const ALL: [CategoryBucket; 3] = [Self::Courses, Self::Exams, Self::Other];

    pub fn for_category(category: &str) -> Self {
        match normalize_subject(category).as_str() {
            "Course" => Self::Courses,
            "Exam" => Self::Exams,
            _ => Self::Other,
        }
    }

    pub fn folder(self) -> &'static str {
        match self {
            Self::Courses => "Courses",
            Self::Exams => "Exams",
            Self::Other => "Other",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Courses => "courses.json",
            Self::Exams => "exams.json",
            Self::Other => "others.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootFolder {
    /// An existing folder (or shared drive) id, used as-is.
    Id(String),
    /// A top-level folder looked up by name and created when missing.
    Named(String),
}

#[derive(Debug, Clone)]
pub struct OrganizeConfig {
    pub root: RootFolder,
    /// Pause between successive uploads.
    pub group_delay: Duration,
    /// Applies to 5xx storage failures only.
    pub storage_retry: RetryPolicy,
    pub category_index: bool,
}

impl OrganizeConfig {
    pub fn from_args(args: &OrganizeArgs) -> Self {
        let root = match args.root_folder_id.as_deref() {
            Some(id) if !id.trim().is_empty() => RootFolder::Id(id.trim().to_owned()),
            _ => RootFolder::Named(args.root_folder_name.clone()),
        };
        Self {
            root,
            group_delay: Duration::from_millis(args.group_delay_ms),
            storage_retry: default_storage_retry(),
            category_index: args.category_index,
        }
    }
}

/// 1s, 2s, 4s, 8s between five attempts.
pub fn default_storage_retry() -> RetryPolicy {
    RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(16))
}

/// Items sharing one canonical folder and one normalized subject; becomes one document.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectGroup {
    pub folder: String,
    pub subject: String,
    pub items: Vec<LabeledItem>,
}

impl SubjectGroup {
    pub fn document_name(&self) -> String {
        format!("{}.doc", self.subject)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeSummary {
    pub folders: usize,
    pub documents: usize,
    pub items: usize,
}

pub async fn run(args: OrganizeArgs) -> anyhow::Result<()> {
    let paths = DataPaths::new(&args.data_dir);
    if !paths.label_store.exists() {
        anyhow::bail!("label store not found: {}", paths.label_store.display());
    }
    let labels = LabelStore::open(&paths.label_store).await?;

    let taxonomy = match args.taxonomy.as_deref() {
        Some(path) => SubjectTaxonomy::from_yaml_file(&PathBuf::from(path))?,
        None => SubjectTaxonomy::builtin(),
    };
    let store = build_store(&args)?;
    let config = OrganizeConfig::from_args(&args);

    let summary = organize(
        &config,
        &taxonomy,
        store.as_ref(),
        &TokioSleeper,
        labels.items(),
    )
    .await?;
    tracing::info!(?summary, "organize completed");
    Ok(())
}

fn build_store(args: &OrganizeArgs) -> anyhow::Result<Box<dyn DocumentStore>> {
    Ok(match args.store {
        StoreKind::Drive => Box::new(DriveStore::new(
            &args.drive_base_url,
            &args.drive_upload_base_url,
            TokenSource::from_env(),
        )),
        StoreKind::Local => {
            let root = args
                .local_root
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--local-root is required with --store local"))?;
            Box::new(LocalFsStore::new(root))
        }
    })
}

/// Groups items by `(folder, normalized subject)` in sorted order.
pub fn group_items(items: &[LabeledItem], taxonomy: &SubjectTaxonomy) -> Vec<SubjectGroup> {
    let mut groups: BTreeMap<(String, String), Vec<LabeledItem>> = BTreeMap::new();
    for item in items {
        let subject = normalize_subject(&item.subject);
        let folder = taxonomy.folder_for(&subject);
        groups.entry((folder, subject)).or_default().push(item.clone());
    }
    groups
        .into_iter()
        .map(|((folder, subject), items)| SubjectGroup {
            folder,
            subject,
            items,
        })
        .collect()
}

/// Writes one link-list document per subject group into its folder under the root.
pub async fn organize(
    config: &OrganizeConfig,
    taxonomy: &SubjectTaxonomy,
    store: &dyn DocumentStore,
    sleeper: &dyn Sleeper,
    items: &[LabeledItem],
) -> anyhow::Result<OrganizeSummary> {
    if items.is_empty() {
        tracing::info!("no labeled items to organize");
        return Ok(OrganizeSummary::default());
    }

    let mut uploader = Uploader {
        store,
        sleeper,
        policy: &config.storage_retry,
        folders: HashMap::new(),
    };

    let root_id = match &config.root {
        RootFolder::Id(id) => id.clone(),
        RootFolder::Named(name) => uploader
            .folder(name, None)
            .await
            .with_context(|| format!("ensure root folder: {name}"))?,
    };

    let groups = group_items(items, taxonomy);
    tracing::info!(items = items.len(), groups = groups.len(), "organize: grouped");

    let mut summary = OrganizeSummary {
        items: items.len(),
        ..OrganizeSummary::default()
    };

    for (idx, group) in groups.iter().enumerate() {
        if idx > 0 {
            sleeper.sleep(config.group_delay).await;
        }
        let folder_id = uploader
            .folder(&group.folder, Some(&root_id))
            .await
            .with_context(|| format!("ensure folder: {}", group.folder))?;

        let name = group.document_name();
        uploader
            .document(&name, &folder_id, GOOGLE_DOC_MIME, &render_link_list(&group.items))
            .await
            .with_context(|| format!("upload {}/{name}", group.folder))?;
        tracing::info!(
            folder = %group.folder,
            document = %name,
            items = group.items.len(),
            "uploaded"
        );
        summary.documents += 1;
    }

    if config.category_index {
        let documents = upload_category_index(&mut uploader, config, &root_id, items).await?;
        summary.documents += documents;
    }

    summary.folders = uploader.folders.len();
    Ok(summary)
}

async fn upload_category_index(
    uploader: &mut Uploader<'_>,
    config: &OrganizeConfig,
    root_id: &str,
    items: &[LabeledItem],
) -> anyhow::Result<usize> {
    let mut buckets: BTreeMap<CategoryBucket, Vec<&LabeledItem>> =
        CategoryBucket::ALL.iter().map(|b| (*b, Vec::new())).collect();
    for item in items {
        buckets
            .entry(CategoryBucket::for_category(&item.category))
            .or_default()
            .push(item);
    }

    for (bucket, members) in &buckets {
        let folder_id = uploader
            .folder(bucket.folder(), Some(root_id))
            .await
            .with_context(|| format!("ensure category folder: {}", bucket.folder()))?;
        uploader.sleeper.sleep(config.group_delay).await;
        let json = serde_json::to_string_pretty(members).context("serialize category index")?;
        uploader
            .document(bucket.file_name(), &folder_id, "application/json", &json)
            .await
            .with_context(|| format!("upload {}/{}", bucket.folder(), bucket.file_name()))?;
        tracing::info!(folder = bucket.folder(), items = members.len(), "uploaded category index");
    }
    Ok(buckets.len())
}

/// Storage calls with 5xx retry and a per-run folder id cache.
struct Uploader<'a> {
    store: &'a dyn DocumentStore,
    sleeper: &'a dyn Sleeper,
    policy: &'a RetryPolicy,
    folders: HashMap<(Option<String>, String), String>,
}

impl Uploader<'_> {
    async fn folder(&mut self, name: &str, parent: Option<&str>) -> Result<String, StorageError> {
        let key = (parent.map(str::to_owned), name.to_owned());
        if let Some(id) = self.folders.get(&key) {
            return Ok(id.clone());
        }
        let store = self.store;
        let id = retry::retry(self.policy, self.sleeper, StorageError::is_transient, move |_| {
            ensure_folder(store, name, parent)
        })
        .await?;
        self.folders.insert(key, id.clone());
        Ok(id)
    }

    async fn document(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        content: &str,
    ) -> Result<String, StorageError> {
        let store = self.store;
        retry::retry(self.policy, self.sleeper, StorageError::is_transient, move |_| {
            store.create_document(name, parent, mime_type, content)
        })
        .await
    }
}

/// HTML bullet list linking every item: title as anchor text, url as href.
pub fn render_link_list(items: &[LabeledItem]) -> String {
    let mut html = String::from("<ul>\n");
    for item in items {
        html.push_str(&format!(
            "  <li><a href=\"{}\">{}</a></li>\n",
            escape_html(&item.url),
            escape_html(item.display_title())
        ));
    }
    html.push_str("</ul>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
