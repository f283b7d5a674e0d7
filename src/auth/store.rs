//! Loads, saves and deletes the persisted `TokenFile`.

use crate::auth::TokenFile;
use crate::error::{AuthError, AuthResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// The outcome of reading the token file. A file that exists but cannot be parsed is not an error
/// at this level; the caller decides what to do about it.
#[derive(Debug)]
pub(crate) enum Loaded {
    Found(TokenFile),
    NotFound,
    Corrupt(serde_json::Error),
}

/// Owns the on-disk representation of the token for the duration of a run.
#[derive(Debug, Clone)]
pub(crate) struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn load(&self) -> AuthResult<Loaded> {
        // Bytes rather than a String so that invalid UTF-8 counts as corrupt content.
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::NotFound),
            Err(source) => return Err(self.io_error("read", source)),
        };
        Ok(match serde_json::from_slice(&content) {
            Ok(token) => Loaded::Found(token),
            Err(e) => Loaded::Corrupt(e),
        })
    }

    /// Writes the token next to its destination and renames it into place so that an existing
    /// token file is never left half written.
    pub(crate) async fn save(&self, token: &TokenFile) -> AuthResult<()> {
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| self.io_error("serialize", std::io::Error::other(e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error("create the directory for", source))?;
        }

        let tmp = self.tmp_path();
        if let Err(source) = write_private(&tmp, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error("write", source));
        }

        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error("replace", source));
        }
        debug!("Saved token to {}", self.path.display());
        Ok(())
    }

    /// Removes the token file. A missing file is not an error.
    pub(crate) async fn delete(&self) -> AuthResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Deleted token file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error("delete", source)),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, action: &'static str, source: std::io::Error) -> AuthError {
        AuthError::StorageIo {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

/// Creates (or truncates) `path` readable by the owner only and writes `contents` to it. The mode
/// is applied at creation, so the file is never readable by others.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    // A leftover temp file keeps its old mode, so tighten it as well.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(contents).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ClientMetadata;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn token() -> TokenFile {
        TokenFile::new(
            "access",
            Some("refresh".to_string()),
            ClientMetadata {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                token_uri: "https://oauth2.googleapis.com/token".to_string(),
            },
            vec!["https://www.googleapis.com/auth/calendar".to_string()],
            Utc::now() + Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(matches!(store.load().await.unwrap(), Loaded::NotFound));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));
        let original = token();
        store.save(&original).await.unwrap();
        match store.load().await.unwrap() {
            Loaded::Found(loaded) => assert_eq!(original, loaded),
            other => panic!("expected a token, got {other:?}"),
        }
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&token()).await.unwrap();
        let mut second = token();
        second.apply_refresh(
            crate::auth::TokenGrant {
                access_token: "second".to_string(),
                refresh_token: None,
                expires_in: None,
                scopes: None,
            },
            Utc::now(),
        );
        store.save(&second).await.unwrap();
        let Loaded::Found(loaded) = store.load().await.unwrap() else {
            panic!("expected a token");
        };
        assert_eq!("second", loaded.access_token());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_save_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&token()).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
    }

    #[tokio::test]
    async fn test_load_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        let garbage: [&[u8]; 7] = [
            b"",
            b"{",
            b"not json at all",
            br#"{"token": 5}"#,
            b"[]",
            &[0xff, 0xfe, 0x00, 0x7b],
            b"{\"token\": \"\xc3\x28\"}",
        ];
        for bytes in garbage {
            std::fs::write(&path, bytes).unwrap();
            let loaded = TokenStore::new(&path).load().await.unwrap();
            assert!(matches!(loaded, Loaded::Corrupt(_)), "{bytes:?}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_save_tightens_stale_tmp_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        std::fs::write(store.tmp_path(), "stale").unwrap();
        std::fs::set_permissions(store.tmp_path(), std::fs::Permissions::from_mode(0o644))
            .unwrap();

        write_private(&store.tmp_path(), b"{}").await.unwrap();
        let mode = std::fs::metadata(store.tmp_path()).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
        assert_eq!("{}", std::fs::read_to_string(store.tmp_path()).unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.delete().await.unwrap();
        store.save(&token()).await.unwrap();
        store.delete().await.unwrap();
        assert!(!store.path().exists());
    }
}
