use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::dataset::APIFY_BASE_URL;
use crate::gemini::{DEFAULT_MODEL, GEMINI_BASE_URL};
use crate::storage::{DRIVE_BASE_URL, DRIVE_UPLOAD_BASE_URL};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch → classify → organize.
    Run(RunArgs),
    /// Download the dataset and write the items newer than the watermark.
    Fetch(FetchArgs),
    /// Label items that are not in the label store yet.
    Classify(ClassifyArgs),
    /// Upload labeled items into the folder taxonomy.
    Organize(OrganizeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ItemSource {
    /// Items from the last fetch that were newer than the watermark.
    New,
    /// Every item from the last fetch.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Drive,
    Local,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Directory holding the watermark and item files.
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Apify dataset id. The token is read from APIFY_API_TOKEN.
    #[arg(long)]
    pub dataset_id: String,

    #[arg(long, default_value = APIFY_BASE_URL)]
    pub apify_base_url: String,
}

#[derive(Debug, Clone, Args)]
pub struct ClassifyArgs {
    /// Directory holding the item files and the label store.
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Which item file to label.
    #[arg(long, value_enum, default_value_t = ItemSource::New)]
    pub source: ItemSource,

    /// Gemini model. The key is read from GEMINI_API_KEY (or GOOGLE_API_KEY).
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value = GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    /// Pause after every item.
    #[arg(long, default_value_t = 5_000)]
    pub request_delay_ms: u64,

    /// Wait after an HTTP 429 before trying again.
    #[arg(long, default_value_t = 30_000)]
    pub rate_limit_backoff_ms: u64,

    /// Total attempts per item while rate limited.
    #[arg(long, default_value_t = 5)]
    pub rate_limit_attempts: usize,
}

#[derive(Debug, Clone, Args)]
pub struct OrganizeArgs {
    /// Directory holding the label store.
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    #[arg(long, value_enum, default_value_t = StoreKind::Drive)]
    pub store: StoreKind,

    /// Root directory for `--store local`.
    #[arg(long)]
    pub local_root: Option<String>,

    /// Existing folder id to organize into (for example a shared drive folder).
    #[arg(long)]
    pub root_folder_id: Option<String>,

    /// Top-level folder created when no --root-folder-id is given.
    #[arg(long, default_value = "LMS Organized Data")]
    pub root_folder_name: String,

    /// YAML list of `{folder, subjects}` replacing the built-in subject table.
    #[arg(long)]
    pub taxonomy: Option<String>,

    /// Pause between uploads.
    #[arg(long, default_value_t = 500)]
    pub group_delay_ms: u64,

    /// Also upload `courses.json`, `exams.json` and `others.json` into `Courses`,
    /// `Exams` and `Other` folders under the root.
    #[arg(long)]
    pub category_index: bool,

    /// Drive API base. The token is read from GOOGLE_DRIVE_ACCESS_TOKEN, else the
    /// metadata server.
    #[arg(long, default_value = DRIVE_BASE_URL)]
    pub drive_base_url: String,

    #[arg(long, default_value = DRIVE_UPLOAD_BASE_URL)]
    pub drive_upload_base_url: String,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Classify and organize the existing new-items file without fetching.
    #[arg(long)]
    pub skip_fetch: bool,

    /// Required unless --skip-fetch is given.
    #[arg(long, required_unless_present = "skip_fetch")]
    pub dataset_id: Option<String>,

    #[arg(long, default_value = APIFY_BASE_URL)]
    pub apify_base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value = GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    #[arg(long, default_value_t = 5_000)]
    pub request_delay_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub rate_limit_backoff_ms: u64,

    #[arg(long, default_value_t = 5)]
    pub rate_limit_attempts: usize,

    #[arg(long, value_enum, default_value_t = StoreKind::Drive)]
    pub store: StoreKind,

    #[arg(long)]
    pub local_root: Option<String>,

    #[arg(long)]
    pub root_folder_id: Option<String>,

    #[arg(long, default_value = "LMS Organized Data")]
    pub root_folder_name: String,

    #[arg(long)]
    pub taxonomy: Option<String>,

    #[arg(long, default_value_t = 500)]
    pub group_delay_ms: u64,

    #[arg(long)]
    pub category_index: bool,

    #[arg(long, default_value = DRIVE_BASE_URL)]
    pub drive_base_url: String,

    #[arg(long, default_value = DRIVE_UPLOAD_BASE_URL)]
    pub drive_upload_base_url: String,
}
