use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use tokio::task::spawn_blocking;

use crate::operations::Library;
use crate::operations::media::{delete_media, transfer};
use crate::operations::sync::sync;
use crate::operations::verify::{verify, verify_all};
use crate::operations::versions::{Selection, make_versions, regenerate, selected_ids};

#[derive(Parser, Debug)]
#[command(name = "vitrine", version, about = "Media version generation pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run queue workers until interrupted
    Worker,
    /// Import a file, http(s) URL or provider page, then make its versions
    Transfer {
        source: String,
        title: Option<String>,
    },
    /// Delete and remake versions: `all`, an id or an inclusive `from-to` range
    Regenerate {
        #[arg(default_value = "all")]
        selection: Selection,
    },
    /// Remove orphan files and rows
    Sync {
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-hash stored files against their checksums (every media without an id)
    Verify { id: Option<u64> },
    /// Delete a media together with its versions
    Delete { id: u64 },
}

pub async fn run(cli: Cli, library: Library) -> Result<()> {
    match cli.command {
        Command::Worker => run_worker(&library).await,
        Command::Transfer { source, title } => run_transfer(&library, source, title).await,
        Command::Regenerate { selection } => run_regenerate(&library, selection).await,
        Command::Sync { dry_run } => {
            let report = blocking(&library, move |library| sync(&library, dry_run)).await?;
            for path in &report.orphan_files {
                println!("orphan file     {}", path.display());
            }
            for (media_id, version) in &report.orphan_versions {
                println!("orphan version  {} {}", media_id, version);
            }
            for media_id in &report.orphan_media {
                println!("orphan media    {}", media_id);
            }
            for media_id in &report.kept_media {
                println!("kept media      {} (file missing, versions remain)", media_id);
            }
            Ok(())
        }
        Command::Verify { id } => {
            let reports = match id {
                Some(id) => vec![blocking(&library, move |library| verify(&library, id)).await?],
                None => blocking(&library, |library| verify_all(&library)).await?,
            };
            let mut broken = 0;
            for report in &reports {
                for failure in &report.failures {
                    println!("{}", failure);
                }
                if !report.is_intact() {
                    broken += 1;
                }
            }
            if broken > 0 {
                bail!("{} of {} media failed verification", broken, reports.len());
            }
            println!("{} media verified", reports.len());
            Ok(())
        }
        Command::Delete { id } => {
            blocking(&library, move |library| delete_media(&library, id)).await
        }
    }
}

async fn blocking<T, F>(library: &Library, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Library) -> Result<T> + Send + 'static,
{
    let library = library.clone();
    spawn_blocking(move || work(library))
        .await
        .context("blocking task panicked")?
}

async fn run_worker(library: &Library) -> Result<()> {
    let workers = library.start_workers();
    info!("{} worker(s) running, press Ctrl-C to stop", workers.len());
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Stopping workers after the current jobs");
    library.queue.close();
    library.queue.wait_idle().await;
    Ok(())
}

async fn run_transfer(library: &Library, source: String, title: Option<String>) -> Result<()> {
    library.start_workers();
    let media =
        blocking(library, move |library| transfer(&library, &source, title.as_deref())).await?;
    make_versions(library, &media).await?;
    library.queue.wait_idle().await;
    library.queue.close();

    println!("media {} {}", media.id, media.locator);
    for version in library.store.load_versions(media.id)? {
        println!("  {:<12} {:<10} {}", version.version, version.status, version.locator);
    }
    Ok(())
}

async fn run_regenerate(library: &Library, selection: Selection) -> Result<()> {
    library.start_workers();
    let total = blocking(library, move |library| selected_ids(&library, selection))
        .await?
        .len();

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );
    let reports = regenerate(library, selection, |report| {
        progress.set_message(format!("media {}", report.media_id));
        progress.inc(1);
    })
    .await?;
    progress.finish_and_clear();

    library.queue.wait_idle().await;
    library.queue.close();

    let failed: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
    for report in &failed {
        warn!(
            "media {}: {}",
            report.media_id,
            report.error.as_deref().unwrap_or_default()
        );
    }
    println!(
        "{} media regenerated, {} failed",
        reports.len() - failed.len(),
        failed.len()
    );
    Ok(())
}
