//! Filesystem-backed reference `Storage` driver. File layout as given as
//! an example in `spec.md` §6: `{bucket}/{urlencode(room)}/{urlencode(docid)}/{uuid}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::application::ports::storage::{RetrievedDoc, Storage, StorageError, StorageRef};

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn doc_dir(&self, room: &str, docid: &str) -> PathBuf {
        self.root
            .join(urlencoding::encode(room).into_owned())
            .join(urlencoding::encode(docid).into_owned())
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<StorageRef, StorageError> {
        let dir = self.doc_dir(room, docid);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;
        let reference = Uuid::new_v4().to_string();
        let path = dir.join(&reference);
        fs::write(&path, merged_state)
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;
        Ok(StorageRef(reference))
    }

    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError> {
        let dir = self.doc_dir(room, docid);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Backend(e.into())),
        };

        let mut references = Vec::new();
        let mut blobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let bytes = fs::read(entry.path())
                .await
                .map_err(|e| StorageError::Backend(e.into()))?;
            references.push(StorageRef(name));
            blobs.push(bytes);
        }
        if blobs.is_empty() {
            return Ok(None);
        }
        let merged = crate::crdt::merge_updates(&blobs)
            .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?;
        Ok(Some(RetrievedDoc {
            merged: crate::crdt::encode_state(&merged),
            references,
        }))
    }

    async fn retrieve_state_vector(
        &self,
        _room: &str,
        _docid: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn delete_references(&self, room: &str, docid: &str, refs: &[StorageRef]) {
        let dir = self.doc_dir(room, docid);
        for r in refs {
            let path: &Path = &dir.join(&r.0);
            if let Err(e) = fs::remove_file(path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(room, docid, reference = %r, error = %e, "fs_storage_delete_failed");
            }
        }
    }

    async fn destroy(&self) {}
}
