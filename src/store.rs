//! Durable attachment cache.
//!
//! Attachment payloads are copied into one cache directory so they outlive
//! the request that produced them. Cache filenames embed the message's queue
//! timestamp plus a random suffix and are never reused.

use std::path::{Path, PathBuf};

use rand::{distributions::Alphanumeric, Rng};

use crate::{error::Error, message::Attachment};

#[derive(Clone, Debug)]
pub struct AttachmentStore {
    cache_dir: PathBuf,
}

impl AttachmentStore {
    pub async fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let cache_dir = cache_dir.into();
        tokio::fs::create_dir_all(&cache_dir).await?;

        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether the attachment already lives in this store's cache directory.
    pub fn is_cached(&self, attachment: &Attachment) -> bool {
        attachment.storage_dir == self.cache_dir
    }

    /// Copies the attachment payload into the cache directory and returns the
    /// updated metadata. An attachment that already lives in the cache is
    /// returned unchanged. Transient originals are removed after a successful
    /// copy, so a payload never exists twice on disk.
    pub async fn cache(&self, attachment: &Attachment, seed: i64) -> Result<Attachment, Error> {
        if self.is_cached(attachment) {
            return Ok(attachment.clone());
        }

        let source = attachment.path();
        let storage_file = self.unique_name(seed, &attachment.name).await?;
        let target = self.cache_dir.join(&storage_file);

        if let Err(source_err) = tokio::fs::copy(&source, &target).await {
            // A partial target would otherwise leak into the cache
            let _ = tokio::fs::remove_file(&target).await;

            return Err(Error::AttachmentCache {
                name: attachment.name.clone(),
                source: source_err,
            });
        }

        if let Err(err) = tokio::fs::remove_file(&source).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %source.display(),
                    %err,
                    "could not remove transient attachment original"
                );
            }
        }

        Ok(Attachment {
            storage_dir: self.cache_dir.clone(),
            storage_file,
            ..attachment.clone()
        })
    }

    /// Deletes the attachment payload. A file that is already gone counts as
    /// released.
    pub async fn release(&self, attachment: &Attachment) -> Result<(), Error> {
        match tokio::fs::remove_file(attachment.path()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn unique_name(&self, seed: i64, name: &str) -> Result<String, Error> {
        let base = sanitize(name);

        loop {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();

            let candidate = format!("{seed}-{suffix}-{base}");

            if !tokio::fs::try_exists(self.cache_dir.join(&candidate)).await? {
                return Ok(candidate);
            }
        }
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "attachment".to_owned()
    } else {
        cleaned
    }
}
