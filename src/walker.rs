use tracing::debug;

use crate::{
    api::{ItemType, RepoApi},
    error::{ApiError, FetchError},
    location::Location,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A remote filesystem object, `path` is relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub fetch_url: String,
}

/// Finds the tree at `location.path` and returns every file below it.
///
/// The descent costs one request per path segment after the ref lookup, the
/// listing itself is a single recursive request.
pub async fn walk<A>(api: &A, location: &Location) -> Result<Vec<TreeEntry>, FetchError>
where
    A: RepoApi + ?Sized,
{
    let commit = api.resolve_ref(location).await.map_err(|e| match e {
        ApiError::NotFound { .. } => FetchError::RefNotFound {
            repository: location.slug(),
            reference: location.reference.clone(),
        },
        e => e.into(),
    })?;
    debug!("Resolved {} to commit {}", location.reference, commit.sha);

    let mut tree_sha = commit.tree_sha;
    for segment in location.segments() {
        let listing = api.list_tree(location, &tree_sha, false).await?;
        let child = listing
            .items
            .into_iter()
            .find(|item| item.path == segment && item.item_type == ItemType::Tree)
            .ok_or_else(|| FetchError::PathNotFound {
                path: location.path.clone(),
                segment: segment.to_string(),
                reference: location.reference.clone(),
            })?;
        tree_sha = child.sha;
    }

    let listing = api.list_tree(location, &tree_sha, true).await?;
    if listing.truncated {
        return Err(FetchError::TruncatedListing {
            path: location.path.clone(),
        });
    }

    let mut entries = vec![];
    for item in listing.items {
        let path = format!("{}/{}", location.path, item.path);
        match item.item_type {
            ItemType::Blob => entries.push(TreeEntry {
                fetch_url: api.content_url(location, &commit.sha, &path),
                path,
                kind: EntryKind::File,
                size: item.size,
            }),
            // the recursive listing already contains everything below a directory
            ItemType::Tree => {}
            ItemType::Commit => debug!("Skipping submodule at {path}"),
        }
    }

    debug!("Found {} files below {}", entries.len(), location.path);
    Ok(entries)
}
