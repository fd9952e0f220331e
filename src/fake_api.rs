//! In-memory [`RepoApi`] used by the tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use hyper::{body::Bytes, StatusCode};

use crate::{
    api::{ChunkStream, Commit, ItemType, RepoApi, TreeItem, TreeListing},
    error::{ApiError, ApiResult},
    location::Location,
};

const CHUNK_SIZE: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ResolveRef,
    ListTree { tree: String, recursive: bool },
    OpenContent { url: String },
}

#[derive(Default)]
pub struct FakeRepo {
    files: BTreeMap<String, Vec<u8>>,
    submodules: Vec<String>,
    missing_ref: bool,
    truncated: bool,
    /// open fails
    broken: HashSet<String>,
    /// fails after the first chunk
    interrupted: HashSet<String>,
    /// panics while streaming
    panicking: HashSet<String>,
    /// fails on the first n attempts to resolve the ref
    transient_failures: AtomicUsize,
    chunk_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl FakeRepo {
    pub const COMMIT: &'static str = "c0ffee";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }

    pub fn submodule(mut self, path: &str) -> Self {
        self.submodules.push(path.to_string());
        self
    }

    pub fn without_ref(mut self) -> Self {
        self.missing_ref = true;
        self
    }

    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn broken(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }

    pub fn interrupted(mut self, path: &str) -> Self {
        self.interrupted.insert(path.to_string());
        self
    }

    pub fn panicking(mut self, path: &str) -> Self {
        self.panicking.insert(path.to_string());
        self
    }

    pub fn flaky(self, failures: usize) -> Self {
        self.transient_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Every object below `dir` as (relative path, type, size).
    fn descendants(&self, dir: &str) -> Vec<(String, ItemType, Option<u64>)> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut directories = BTreeSet::new();
        let mut items = vec![];
        let objects = self
            .files
            .iter()
            .map(|(path, content)| (path, ItemType::Blob, Some(content.len() as u64)))
            .chain(self.submodules.iter().map(|path| (path, ItemType::Commit, None)));

        for (path, item_type, size) in objects {
            let Some(relative) = path.strip_prefix(&prefix) else {
                continue;
            };
            let mut parent = String::new();
            let segments: Vec<_> = relative.split('/').collect();
            for segment in &segments[..segments.len() - 1] {
                if !parent.is_empty() {
                    parent.push('/');
                }
                parent.push_str(segment);
                directories.insert(parent.clone());
            }
            items.push((relative.to_string(), item_type, size));
        }

        items.extend(
            directories
                .into_iter()
                .map(|directory| (directory, ItemType::Tree, None)),
        );
        items
    }
}

#[async_trait]
impl RepoApi for FakeRepo {
    async fn resolve_ref(&self, location: &Location) -> ApiResult<Commit> {
        self.record(Call::ResolveRef);

        let url = format!("fake://commits/{}", location.reference);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Status {
                url,
                status: StatusCode::BAD_GATEWAY,
            });
        }
        if self.missing_ref {
            return Err(ApiError::NotFound { url });
        }

        Ok(Commit {
            sha: Self::COMMIT.to_string(),
            tree_sha: "tree:".to_string(),
        })
    }

    async fn list_tree(
        &self,
        _location: &Location,
        tree_sha: &str,
        recursive: bool,
    ) -> ApiResult<TreeListing> {
        self.record(Call::ListTree {
            tree: tree_sha.to_string(),
            recursive,
        });

        let dir = tree_sha
            .strip_prefix("tree:")
            .ok_or_else(|| ApiError::NotFound {
                url: format!("fake://trees/{tree_sha}"),
            })?;

        let items = self
            .descendants(dir)
            .into_iter()
            .filter(|(path, _, _)| recursive || !path.contains('/'))
            .map(|(path, item_type, size)| {
                let full = if dir.is_empty() {
                    path.clone()
                } else {
                    format!("{dir}/{path}")
                };
                TreeItem {
                    sha: format!("tree:{full}"),
                    path,
                    item_type,
                    size,
                }
            })
            .collect();

        Ok(TreeListing {
            items,
            truncated: recursive && self.truncated,
        })
    }

    fn content_url(&self, _location: &Location, revision: &str, path: &str) -> String {
        format!("fake://{revision}/{path}")
    }

    async fn open_content(&self, url: &str) -> ApiResult<Box<dyn ChunkStream>> {
        self.record(Call::OpenContent {
            url: url.to_string(),
        });

        let not_found = || ApiError::NotFound {
            url: url.to_string(),
        };
        let path = url
            .strip_prefix(&format!("fake://{}/", Self::COMMIT))
            .ok_or_else(not_found)?;
        if self.broken.contains(path) {
            return Err(not_found());
        }
        let content = self.files.get(path).ok_or_else(not_found)?;

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        Ok(Box::new(FakeChunks {
            url: url.to_string(),
            chunks: content
                .chunks(CHUNK_SIZE)
                .map(Bytes::copy_from_slice)
                .rev()
                .collect(),
            sent: 0,
            interrupted: self.interrupted.contains(path),
            panicking: self.panicking.contains(path),
            delay: self.chunk_delay,
            in_flight: self.in_flight.clone(),
        }))
    }
}

struct FakeChunks {
    url: String,
    /// reversed so `pop` yields them in order
    chunks: Vec<Bytes>,
    sent: usize,
    interrupted: bool,
    panicking: bool,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl ChunkStream for FakeChunks {
    async fn next_chunk(&mut self) -> ApiResult<Option<Bytes>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking {
            panic!("transfer of {} blew up", self.url);
        }
        if self.interrupted && self.sent == 1 {
            return Err(ApiError::Status {
                url: self.url.clone(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }

        self.sent += 1;
        Ok(self.chunks.pop())
    }
}

impl Drop for FakeChunks {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
