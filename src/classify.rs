use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;

use crate::cli::{ClassifyArgs, ItemSource};
use crate::formats::{Item, Label, LabeledItem, UNKNOWN};
use crate::gemini::{CompletionClient, CompletionError, GeminiClient};
use crate::retry::{self, RetryPolicy, Sleeper, TokioSleeper};
use crate::workspace::{self, DataPaths, LabelStore};

#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// Pause after every processed item, whether or not the API was called.
    pub request_delay: Duration,
    /// Applies to HTTP 429 only.
    pub rate_limit: RetryPolicy,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(5),
            rate_limit: RetryPolicy::fixed(5, Duration::from_secs(30)),
        }
    }
}

impl ClassifyConfig {
    pub fn from_args(args: &ClassifyArgs) -> Self {
        Self {
            request_delay: Duration::from_millis(args.request_delay_ms),
            rate_limit: RetryPolicy::fixed(
                args.rate_limit_attempts,
                Duration::from_millis(args.rate_limit_backoff_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifySummary {
    pub total: usize,
    pub skipped: usize,
    pub labeled: usize,
    pub empty: usize,
    pub fallbacks: usize,
    pub errors: usize,
}

pub async fn run(args: ClassifyArgs) -> anyhow::Result<()> {
    let api_key = std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;
    let client = GeminiClient::new(&args.gemini_base_url, &args.model, api_key)?;
    let config = ClassifyConfig::from_args(&args);
    let paths = DataPaths::new(&args.data_dir);

    let input = match args.source {
        ItemSource::New => &paths.new_items,
        ItemSource::Raw => &paths.raw_items,
    };
    if !input.exists() {
        anyhow::bail!("input items not found: {}", input.display());
    }
    let items = workspace::read_items(input).await?;
    let mut store = LabelStore::open(&paths.label_store).await?;

    let summary = classify_all(&config, &client, &TokioSleeper, &items, &mut store).await?;
    tracing::info!(?summary, store = store.len(), "classification completed");
    Ok(())
}

/// Labels every item whose url is not yet in `store`, persisting after each one.
///
/// Per-item API failures degrade to sentinel labels; only transport and file errors
/// are returned.
pub async fn classify_all(
    config: &ClassifyConfig,
    completion: &dyn CompletionClient,
    sleeper: &dyn Sleeper,
    items: &[Item],
    store: &mut LabelStore,
) -> anyhow::Result<ClassifySummary> {
    let mut summary = ClassifySummary {
        total: items.len(),
        ..ClassifySummary::default()
    };
    tracing::info!(items = items.len(), already_labeled = store.len(), "classify: loaded");

    for (idx, item) in items.iter().enumerate() {
        if store.contains(item.url()) {
            summary.skipped += 1;
            continue;
        }

        let label = match classify_item(config, completion, sleeper, item)
            .await
            .with_context(|| format!("classify item {idx}: {}", item.url()))?
        {
            ItemLabel::Empty => {
                tracing::debug!(idx, url = %item.url(), "empty content; using default label");
                summary.empty += 1;
                Label::fallback()
            }
            ItemLabel::Labeled(label) => label,
            ItemLabel::Fallback(reason) => {
                tracing::warn!(idx, url = %item.url(), %reason, "using default label");
                summary.fallbacks += 1;
                Label::fallback()
            }
            ItemLabel::Failed(reason) => {
                tracing::warn!(idx, url = %item.url(), %reason, "using error label");
                summary.errors += 1;
                Label::error()
            }
        };

        tracing::info!(
            idx,
            url = %item.url(),
            category = %label.category,
            subject = %label.subject,
            "labeled"
        );
        store.append(LabeledItem::from_item(item, label)).await?;
        summary.labeled += 1;

        sleeper.sleep(config.request_delay).await;
    }

    Ok(summary)
}

enum ItemLabel {
    Empty,
    Labeled(Label),
    Fallback(String),
    Failed(String),
}

async fn classify_item(
    config: &ClassifyConfig,
    completion: &dyn CompletionClient,
    sleeper: &dyn Sleeper,
    item: &Item,
) -> anyhow::Result<ItemLabel> {
    let content = item.content();
    if content.trim().is_empty() {
        return Ok(ItemLabel::Empty);
    }

    let prompt = build_prompt(content);
    let prompt = prompt.as_str();
    let result = retry::retry(
        &config.rate_limit,
        sleeper,
        |err: &CompletionError| matches!(err, CompletionError::RateLimited),
        move |_| completion.complete(prompt),
    )
    .await;

    match result {
        Ok(output) => {
            tracing::debug!(url = %item.url(), %output, "model output");
            Ok(match parse_label_object(&output) {
                Some(object) => ItemLabel::Labeled(label_from_object(&object)),
                None => ItemLabel::Fallback(format!("unparsable model output: {output}")),
            })
        }
        Err(CompletionError::RateLimited) => Ok(ItemLabel::Fallback(format!(
            "still rate limited after {} attempts",
            config.rate_limit.max_attempts
        ))),
        Err(err @ CompletionError::Http { .. }) => Ok(ItemLabel::Failed(err.to_string())),
        Err(err @ CompletionError::MalformedResponse(_)) => {
            Ok(ItemLabel::Fallback(err.to_string()))
        }
        Err(err @ CompletionError::Transport(_)) => Err(err.into()),
    }
}

pub fn build_prompt(content: &str) -> String {
    format!(
        "Classify this social media post strictly as a JSON object with keys \
`category` and `subject`.\n\
- `category`: the kind of content (for example Course, Exam, Study Material, News, Other).\n\
- `subject`: the academic subject or topic it is about.\n\
Return ONLY one JSON object, no lists, no extra text.\n\
\n\
Post content:\n\
{content}"
    )
}

/// Turns raw model output into a label; anything that is not a JSON object (or a list
/// starting with one) yields the default label.
pub fn parse_label(output: &str) -> Label {
    parse_label_object(output)
        .map(|object| label_from_object(&object))
        .unwrap_or_else(Label::fallback)
}

fn parse_label_object(output: &str) -> Option<serde_json::Map<String, Value>> {
    let body = strip_code_fence(output);
    let start = body.find(['{', '['])?;

    // Reads exactly one JSON value; whatever the model wrote after it is ignored.
    let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<Value>();
    let value = values.next()?.ok()?;

    let value = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    match value {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn label_from_object(object: &serde_json::Map<String, Value>) -> Label {
    let field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN)
            .to_owned()
    };
    Label::new(field("category"), field("subject"))
}

fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let inner = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    inner.trim()
}
