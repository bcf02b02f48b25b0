use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    postsort::logging::init().context("init logging")?;

    let cli = postsort::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        postsort::cli::Command::Run(args) => {
            postsort::pipeline::run(args).await.context("run")?;
        }
        postsort::cli::Command::Fetch(args) => {
            postsort::fetch::run(args).await.context("fetch")?;
        }
        postsort::cli::Command::Classify(args) => {
            postsort::classify::run(args).await.context("classify")?;
        }
        postsort::cli::Command::Organize(args) => {
            postsort::organize::run(args).await.context("organize")?;
        }
    }

    Ok(())
}
