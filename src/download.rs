use std::{
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{fs::File, io::AsyncWriteExt, sync::Semaphore};
use tracing::{debug, warn};

use crate::{
    api::RepoApi,
    error::{FetchError, FileFailure},
    location::Location,
    progress::ProgressAggregator,
    walker::{EntryKind, TreeEntry},
};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// A file to fetch and where it ends up on disk.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub entry: TreeEntry,
    /// path below the downloaded directory, used for reporting
    pub relative_path: String,
    pub destination: PathBuf,
    pub transferred: Arc<AtomicU64>,
}

impl DownloadJob {
    pub fn new(
        entry: TreeEntry,
        location: &Location,
        local_root: &Path,
    ) -> Result<Self, FetchError> {
        let relative_path = entry
            .path
            .strip_prefix(&location.path)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(&entry.path)
            .to_string();

        // a listing should never point outside of the listed tree
        let relative = Path::new(&relative_path);
        if relative_path.is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(FetchError::UnsafePath {
                path: entry.path.clone(),
            });
        }

        Ok(Self {
            destination: local_root.join(relative),
            relative_path,
            entry,
            transferred: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Downloads every file entry below `local_root`, at most `concurrency` at a time.
///
/// A failing file does not stop the others, all failures are reported together
/// once every transfer has settled.
pub async fn download_all(
    api: Arc<dyn RepoApi>,
    location: &Location,
    entries: Vec<TreeEntry>,
    local_root: &Path,
    concurrency: usize,
    progress: ProgressMode,
) -> Result<DownloadSummary, FetchError> {
    let jobs = entries
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::File)
        .map(|entry| DownloadJob::new(entry, location, local_root))
        .collect::<Result<Vec<_>, _>>()?;

    let total: u64 = jobs.iter().filter_map(|job| job.entry.size).sum();
    let counters = jobs.iter().map(|job| job.transferred.clone()).collect();
    let aggregator = match progress {
        ProgressMode::Bar => ProgressAggregator::new(total, counters),
        ProgressMode::Hidden => ProgressAggregator::hidden(total, counters),
    };
    aggregator.set_message(format!("{} files", jobs.len()));
    let ticker = aggregator.spawn_ticker();

    // permits are handed out in request order, so queued files start in listing order
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(jobs.len());
    for job in jobs {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let api = api.clone();
        let path = job.relative_path.clone();
        let handle = tokio::spawn(async move {
            let result = download(api.as_ref(), &job).await;
            drop(permit);
            (job, result)
        });
        tasks.push((path, handle));
    }

    let mut files = 0;
    let mut failures = vec![];
    for (path, task) in tasks {
        let error = match task.await {
            Ok((job, Ok(()))) => {
                debug!(
                    "Downloaded '{path}' ({} bytes)",
                    job.transferred.load(Ordering::Relaxed)
                );
                files += 1;
                continue;
            }
            Ok((_, Err(error))) => error,
            Err(e) => FetchError::Task {
                path: path.clone(),
                source: e,
            },
        };

        warn!("Failed to download '{path}': {error}");
        failures.push(FileFailure { path, error });
    }

    let bytes = ticker.finish().await;

    if failures.is_empty() {
        Ok(DownloadSummary { files, bytes })
    } else {
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        Err(FetchError::PartialDownload { failures })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Bar,
    Hidden,
}

async fn download<A>(api: &A, job: &DownloadJob) -> Result<(), FetchError>
where
    A: RepoApi + ?Sized,
{
    if let Some(parent) = job.destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::filesystem(parent, e))?;
    }

    let mut stream = api.open_content(&job.entry.fetch_url).await?;
    let mut file = File::create(&job.destination)
        .await
        .map_err(|e| FetchError::filesystem(&job.destination, e))?;

    while let Some(chunk) = stream.next_chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::filesystem(&job.destination, e))?;
        job.transferred.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    file.flush()
        .await
        .map_err(|e| FetchError::filesystem(&job.destination, e))?;

    Ok(())
}
