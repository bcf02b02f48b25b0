use anyhow::Context as _;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::cli::FetchArgs;
use crate::dataset::{ApifyDataset, DatasetSource};
use crate::formats::Item;
use crate::workspace::{self, DataPaths};

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub all_items: Vec<Item>,
    pub new_items: Vec<Item>,
    /// Watermark after the run; equal to the previous one when nothing was new.
    pub watermark: String,
}

pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let token = std::env::var("APIFY_API_TOKEN")
        .map_err(|_| anyhow::anyhow!("APIFY_API_TOKEN is not set"))?;
    let source = ApifyDataset::new(&args.apify_base_url, &args.dataset_id, token);
    let paths = DataPaths::new(&args.data_dir);

    let outcome = fetch_and_diff(&source, &paths).await?;
    tracing::info!(
        total = outcome.all_items.len(),
        new = outcome.new_items.len(),
        watermark = %outcome.watermark,
        "fetch complete"
    );
    Ok(())
}

/// Pulls the full dataset, snapshots it, and writes the items newer than the stored
/// watermark. The watermark only moves when at least one item is new.
pub async fn fetch_and_diff(
    source: &dyn DatasetSource,
    paths: &DataPaths,
) -> anyhow::Result<FetchOutcome> {
    let previous = workspace::read_watermark(&paths.watermark).await?;
    tracing::info!(watermark = %previous, "fetch: loading dataset");

    let all_items = source.fetch_items().await.context("fetch dataset items")?;

    workspace::write_json_atomic(&paths.raw_items, &all_items)
        .await
        .context("write raw items")?;

    let (new_items, advanced) = diff_against_watermark(&all_items, &previous)?;

    workspace::write_json_atomic(&paths.new_items, &new_items)
        .await
        .context("write new items")?;

    let watermark = match advanced {
        Some(watermark) => {
            workspace::write_watermark(&paths.watermark, &watermark).await?;
            watermark
        }
        None => previous,
    };

    Ok(FetchOutcome {
        all_items,
        new_items,
        watermark,
    })
}

/// Items strictly newer than `watermark`, plus the timestamp string of the newest of
/// them. Items without a timestamp count as epoch; unparsable ones are skipped.
pub fn diff_against_watermark(
    items: &[Item],
    watermark: &str,
) -> anyhow::Result<(Vec<Item>, Option<String>)> {
    let boundary =
        parse_timestamp(watermark).with_context(|| format!("parse watermark: {watermark}"))?;

    let mut new_items = Vec::new();
    let mut newest: Option<(DateTime<Utc>, &str)> = None;

    for item in items {
        let Some(raw) = item.timestamp() else {
            continue;
        };
        let at = match parse_timestamp(raw) {
            Ok(at) => at,
            Err(err) => {
                tracing::warn!(url = %item.url(), timestamp = raw, %err, "skipping item with unparsable timestamp");
                continue;
            }
        };
        if at <= boundary {
            continue;
        }
        if newest.is_none_or(|(max, _)| at > max) {
            newest = Some((at, raw));
        }
        new_items.push(item.clone());
    }

    Ok((new_items, newest.map(|(_, raw)| raw.to_owned())))
}

/// RFC 3339 timestamps keep their offset; naive ones are read as UTC.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|err| anyhow::anyhow!("invalid timestamp {raw:?}: {err}"))?;
    Ok(naive.and_utc())
}
