use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tempfile::TempDir;
use tokio::{fs, process::Command};
use tracing::{debug, warn};

use crate::{error::FetchError, location::Location};

const TEMP_PREFIX: &str = ".git-subdir-";
const MANIFEST: &str = "package.json";

#[derive(Deserialize)]
struct Manifest {
    name: Option<String>,
}

/// Creates the hidden working directory, it is removed again when dropped.
pub async fn create_temp_dir(parent: &Path) -> Result<TempDir, FetchError> {
    let owned = parent.to_path_buf();
    let created = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(owned)
    })
    .await
    .map_err(|e| FetchError::filesystem(parent, std::io::Error::new(ErrorKind::Other, e)))?;

    created.map_err(|e| FetchError::filesystem(parent, e))
}

/// Empties `dir` without removing it.
pub async fn clear_dir(dir: &Path) -> Result<(), FetchError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| FetchError::filesystem(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FetchError::filesystem(dir, e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| FetchError::filesystem(&path, e))?;
        let result = if file_type.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| FetchError::filesystem(&path, e))?;
    }
    Ok(())
}

/// The `name` a downloaded package declares for itself, if any.
pub async fn manifest_name(root: &Path) -> Option<String> {
    let content = fs::read(root.join(MANIFEST)).await.ok()?;
    let manifest: Manifest = match serde_json::from_slice(&content) {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!("Ignoring unreadable {MANIFEST}: {e}");
            return None;
        }
    };

    // scoped packages look like @scope/name
    let name = manifest.name?;
    let name = name.rsplit('/').next().unwrap_or_default().trim();
    sanitize(name)
}

fn sanitize(name: &str) -> Option<String> {
    let name: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let name = name.trim_matches(|c: char| c == '.' || c.is_whitespace());
    (!name.is_empty()).then(|| name.to_string())
}

/// A name given on the command line is used verbatim or not at all.
pub fn check_name(name: &str) -> Result<(), FetchError> {
    match sanitize(name) {
        Some(sanitized) if sanitized == name => Ok(()),
        Some(_) => Err(FetchError::InvalidName {
            name: name.to_string(),
            reason: "it must be a plain directory name without separators or reserved characters",
        }),
        None => Err(FetchError::InvalidName {
            name: name.to_string(),
            reason: "it must not be empty or consist of dots only",
        }),
    }
}

/// Picks the directory name: explicit, else the manifest's, else repository and path.
pub async fn output_name(
    explicit: Option<&str>,
    downloaded: &Path,
    location: &Location,
) -> Result<String, FetchError> {
    if let Some(name) = explicit {
        check_name(name)?;
        return Ok(name.to_string());
    }

    Ok(manifest_name(downloaded).await.unwrap_or_else(|| {
        format!(
            "{}-{}",
            location.repository,
            location.path.replace('/', "-")
        )
    }))
}

/// `base`, `base-1`, `base-2`, ...
pub fn candidate_names(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1u64..).map(move |i| format!("{base}-{i}")))
}

/// Moves `source` to the first free candidate name inside `parent`.
///
/// A candidate is claimed by creating it, which fails if anyone else got
/// there first, and the source is then renamed over the empty placeholder.
pub async fn claim_and_rename(
    source: &Path,
    parent: &Path,
    candidates: impl IntoIterator<Item = String>,
) -> Result<PathBuf, FetchError> {
    for name in candidates {
        let target = parent.join(&name);
        match fs::create_dir(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} already exists, trying the next name", target.display());
                continue;
            }
            Err(e) => return Err(FetchError::filesystem(&target, e)),
        }

        if fs::rename(source, &target).await.is_err() {
            // not every platform allows renaming onto an empty directory
            fs::remove_dir(&target)
                .await
                .map_err(|e| FetchError::filesystem(&target, e))?;
            fs::rename(source, &target)
                .await
                .map_err(|e| FetchError::filesystem(&target, e))?;
        }
        return Ok(target);
    }

    Err(FetchError::filesystem(
        parent,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free directory name left"),
    ))
}

/// Turns the downloaded directory into a fresh repository with one commit.
///
/// Returns whether it worked, failures are only logged.
pub async fn init_repository(dir: &Path, location: &Location) -> bool {
    let message = format!(
        "Initial commit from {}/tree/{}/{}",
        location.slug(),
        location.reference,
        location.path
    );
    let steps: [&[&str]; 3] = [
        &["init", "-q"],
        &["add", "-A"],
        &["commit", "-q", "-m", message.as_str()],
    ];

    for args in steps {
        let output = Command::new("git").args(args).current_dir(dir).output().await;
        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(
                    "git {} failed: {}",
                    args[0],
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return false;
            }
            Err(e) => {
                warn!("Could not run git {}: {e}", args[0]);
                return false;
            }
        }
    }

    true
}
