use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::{ClassifyArgs, FetchArgs, ItemSource, OrganizeArgs, RunArgs};
use crate::workspace::DataPaths;

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let data_dir = PathBuf::from(&args.data_dir);
    let paths = DataPaths::new(&data_dir);

    if args.skip_fetch {
        tracing::info!("run: fetch skipped");
    } else {
        let dataset_id = args
            .dataset_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--dataset-id is required unless --skip-fetch"))?;
        tracing::info!(data_dir = %data_dir.display(), "run: fetch");
        crate::fetch::run(FetchArgs {
            data_dir: args.data_dir.clone(),
            dataset_id,
            apify_base_url: args.apify_base_url.clone(),
        })
        .await
        .context("fetch")?;
    }

    tracing::info!("run: classify");
    crate::classify::run(ClassifyArgs {
        data_dir: args.data_dir.clone(),
        source: ItemSource::New,
        model: args.model.clone(),
        gemini_base_url: args.gemini_base_url.clone(),
        request_delay_ms: args.request_delay_ms,
        rate_limit_backoff_ms: args.rate_limit_backoff_ms,
        rate_limit_attempts: args.rate_limit_attempts,
    })
    .await
    .context("classify")?;

    if !paths.label_store.exists() {
        anyhow::bail!(
            "label store not found after classify, skipping organize: {}",
            paths.label_store.display()
        );
    }

    tracing::info!("run: organize");
    crate::organize::run(OrganizeArgs {
        data_dir: args.data_dir.clone(),
        store: args.store,
        local_root: args.local_root.clone(),
        root_folder_id: args.root_folder_id.clone(),
        root_folder_name: args.root_folder_name.clone(),
        taxonomy: args.taxonomy.clone(),
        group_delay_ms: args.group_delay_ms,
        category_index: args.category_index,
        drive_base_url: args.drive_base_url.clone(),
        drive_upload_base_url: args.drive_upload_base_url.clone(),
    })
    .await
    .context("organize")?;

    tracing::info!("run: pipeline completed");
    Ok(())
}
