use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    api::RepoApi,
    download::{self, DownloadSummary, ProgressMode, DEFAULT_CONCURRENCY},
    error::FetchError,
    location::Location,
    output, walker,
};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub location: Location,
    /// explicit output directory name
    pub name: Option<String>,
    pub concurrency: usize,
    pub init_git: bool,
    pub progress: ProgressMode,
    /// delay before the first retry, doubled for every further one
    pub retry_delay: Duration,
}

impl FetchOptions {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            name: None,
            concurrency: DEFAULT_CONCURRENCY,
            init_git: false,
            progress: ProgressMode::Bar,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct Fetched {
    pub path: PathBuf,
    pub summary: DownloadSummary,
    pub git_initialized: bool,
}

/// Downloads the directory into a new directory below `parent`.
///
/// Nothing is left behind in `parent` when this fails.
pub async fn fetch(
    api: Arc<dyn RepoApi>,
    options: &FetchOptions,
    parent: &Path,
) -> Result<Fetched, FetchError> {
    if let Some(name) = &options.name {
        output::check_name(name)?;
    }

    let temp = output::create_temp_dir(parent).await?;
    let summary = populate_with_retry(api, options, temp.path()).await?;

    let explicit = options.name.as_deref();
    let name = output::output_name(explicit, temp.path(), &options.location).await?;
    let candidates = output::candidate_names(&name);
    let path = output::claim_and_rename(temp.path(), parent, candidates).await?;
    // the directory moved, there is nothing left to clean up
    let _ = temp.into_path();

    let git_initialized =
        options.init_git && output::init_repository(&path, &options.location).await;

    Ok(Fetched {
        path,
        summary,
        git_initialized,
    })
}

async fn populate_with_retry(
    api: Arc<dyn RepoApi>,
    options: &FetchOptions,
    dir: &Path,
) -> Result<DownloadSummary, FetchError> {
    let mut attempt = 1;
    loop {
        match populate(api.clone(), options, dir).await {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = options.retry_delay * 2u32.pow(attempt - 1);
                warn!("Attempt {attempt}/{MAX_ATTEMPTS} failed: {e}, retrying in {delay:?}");
                output::clear_dir(dir).await?;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn populate(
    api: Arc<dyn RepoApi>,
    options: &FetchOptions,
    dir: &Path,
) -> Result<DownloadSummary, FetchError> {
    let location = &options.location;
    let entries = walker::walk(api.as_ref(), location).await?;
    info!(
        "Downloading {} files from {}/{} at {}",
        entries.len(),
        location.slug(),
        location.path,
        location.reference
    );

    download::download_all(
        api,
        location,
        entries,
        dir,
        options.concurrency,
        options.progress,
    )
    .await
}
