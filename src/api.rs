//! The narrow view of the hosting service that the walker and the download
//! scheduler depend on.

use async_trait::async_trait;
use hyper::body::Bytes;
use serde::Deserialize;

use crate::{error::ApiResult, location::Location};

/// A commit that a ref resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub tree_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Tree,
    Blob,
    /// A submodule pointer, it has no content we can fetch.
    Commit,
}

/// One item of a tree listing, `path` is relative to the listed tree.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeItem {
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeListing {
    #[serde(rename = "tree")]
    pub items: Vec<TreeItem>,
    #[serde(default)]
    pub truncated: bool,
}

/// File content arriving in chunks.
#[async_trait]
pub trait ChunkStream: Send {
    /// Returns `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> ApiResult<Option<Bytes>>;
}

#[async_trait]
pub trait RepoApi: Send + Sync {
    /// Resolves a branch, tag or commit name.
    async fn resolve_ref(&self, location: &Location) -> ApiResult<Commit>;

    /// Lists a tree, either its immediate children or all its descendants.
    async fn list_tree(
        &self,
        location: &Location,
        tree_sha: &str,
        recursive: bool,
    ) -> ApiResult<TreeListing>;

    /// Where the raw content of `path` at `revision` can be fetched from.
    fn content_url(&self, location: &Location, revision: &str, path: &str) -> String;

    async fn open_content(&self, url: &str) -> ApiResult<Box<dyn ChunkStream>>;
}
