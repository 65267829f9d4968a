//! One-shot copy of a managed storage bucket into another backend.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::storage::{content_type_for, put_with_retry, RetryPolicy, StorageBackend, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub is_folder: bool,
}

/// A tree-shaped store that can be listed one level at a time.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<ListedEntry>, StorageError>;
    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Migration Summary =====")?;
        writeln!(f, "migrated: {}", self.migrated)?;
        writeln!(f, "skipped:  {}", self.skipped)?;
        writeln!(f, "failed:   {}", self.failed)?;
        write!(f, "=============================")
    }
}

pub struct StorageMigrator {
    source: Arc<dyn ObjectSource>,
    dest: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
}

impl StorageMigrator {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        dest: Arc<dyn StorageBackend>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            dest,
            policy,
        }
    }

    /// Breadth-first listing of every object key under the root.
    pub async fn collect_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut queue = VecDeque::from([String::new()]);
        while let Some(prefix) = queue.pop_front() {
            for entry in self.source.list(&prefix).await? {
                let name = entry.name.trim_end_matches('/');
                let path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}/{name}")
                };
                if entry.is_folder {
                    queue.push_back(path);
                } else {
                    keys.push(path);
                }
            }
        }
        Ok(keys)
    }

    pub async fn run(&self) -> Result<MigrationSummary, StorageError> {
        let keys = self.collect_keys().await?;
        let total = keys.len();
        info!(total, dest = self.dest.name(), "migration: objects found");

        if let Err(e) = self.dest.open_session().await {
            error!(dest = self.dest.name(), error = %e, "destination session failed to open");
            if let Err(close) = self.dest.close_session().await {
                warn!(error = %close, "closing destination session failed");
            }
            return Err(e);
        }
        let mut summary = MigrationSummary::default();
        for (i, key) in keys.iter().enumerate() {
            let position = i + 1;
            match self.dest.exists(key).await {
                Ok(true) => {
                    info!(position, total, key = %key, "already present; skipped");
                    summary.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "existence check failed; copying"),
            }

            let data = match self.source.download(key).await {
                Ok(data) => data,
                Err(e) => {
                    error!(position, total, key = %key, error = %e, "download failed");
                    summary.failed += 1;
                    continue;
                }
            };
            let mime = content_type_for(key);
            match put_with_retry(self.dest.as_ref(), key, data, mime, self.policy).await {
                Some(_) => {
                    info!(position, total, key = %key, "migrated");
                    summary.migrated += 1;
                }
                None => summary.failed += 1,
            }
        }
        if let Err(e) = self.dest.close_session().await {
            warn!(error = %e, "closing destination session failed");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    struct TreeSource {
        tree: HashMap<String, Vec<ListedEntry>>,
        broken: HashSet<String>,
    }

    fn folder(name: &str) -> ListedEntry {
        ListedEntry { name: name.into(), is_folder: true }
    }
    fn file(name: &str) -> ListedEntry {
        ListedEntry { name: name.into(), is_folder: false }
    }

    #[async_trait]
    impl ObjectSource for TreeSource {
        async fn list(&self, prefix: &str) -> Result<Vec<ListedEntry>, StorageError> {
            Ok(self.tree.get(prefix).cloned().unwrap_or_default())
        }
        async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
            if self.broken.contains(key) {
                return Err(StorageError::backend("tree", "gone"));
            }
            Ok(Bytes::from(key.to_string()))
        }
    }

    #[derive(Default)]
    struct Dest {
        present: HashSet<String>,
        puts: Mutex<Vec<(String, String)>>,
        login_fails: bool,
        closes: Mutex<u32>,
    }

    #[async_trait]
    impl StorageBackend for Dest {
        fn name(&self) -> &'static str {
            "dest"
        }
        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.present.contains(key))
        }
        async fn put(&self, key: &str, _d: Bytes, ct: &str) -> Result<String, StorageError> {
            self.puts.lock().unwrap().push((key.into(), ct.into()));
            Ok(key.into())
        }
        async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
            Ok(key.into())
        }
        async fn open_session(&self) -> Result<(), StorageError> {
            if self.login_fails {
                return Err(StorageError::Command {
                    program: "login".into(),
                    message: "denied".into(),
                });
            }
            Ok(())
        }
        async fn close_session(&self) -> Result<(), StorageError> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn source() -> TreeSource {
        let mut tree = HashMap::new();
        tree.insert(String::new(), vec![folder("comic"), file("readme.txt")]);
        tree.insert("comic".into(), vec![folder("X1"), folder("X2")]);
        tree.insert("comic/X1".into(), vec![file("X1_01.jpg"), file("X1_02.png")]);
        tree.insert("comic/X2".into(), vec![file("X2_01.jpg")]);
        TreeSource {
            tree,
            broken: HashSet::from(["comic/X2/X2_01.jpg".to_string()]),
        }
    }

    #[tokio::test]
    async fn walks_tree_breadth_first() {
        let migrator = StorageMigrator::new(
            Arc::new(source()),
            Arc::new(Dest::default()),
            RetryPolicy::default(),
        );
        let keys = migrator.collect_keys().await.unwrap();
        assert_eq!(
            keys,
            vec!["readme.txt", "comic/X1/X1_01.jpg", "comic/X1/X1_02.png", "comic/X2/X2_01.jpg"]
        );
    }

    #[tokio::test]
    async fn skips_existing_and_counts_failures() {
        let dest = Arc::new(Dest {
            present: HashSet::from(["readme.txt".to_string()]),
            ..Default::default()
        });
        let migrator = StorageMigrator::new(
            Arc::new(source()),
            dest.clone(),
            RetryPolicy { attempts: 1, backoff: Duration::ZERO },
        );
        let summary = migrator.run().await.unwrap();
        assert_eq!(summary, MigrationSummary { migrated: 2, skipped: 1, failed: 1 });
        assert_eq!(*dest.closes.lock().unwrap(), 1);

        let puts = dest.puts.lock().unwrap();
        assert_eq!(puts[1], ("comic/X1/X1_02.png".to_string(), "image/png".to_string()));
    }

    #[tokio::test]
    async fn failed_session_open_is_still_closed() {
        let dest = Arc::new(Dest {
            login_fails: true,
            ..Default::default()
        });
        let migrator = StorageMigrator::new(Arc::new(source()), dest.clone(), RetryPolicy::default());

        assert!(migrator.run().await.is_err());
        assert_eq!(*dest.closes.lock().unwrap(), 1);
        assert!(dest.puts.lock().unwrap().is_empty());
    }
}
