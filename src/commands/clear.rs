use crate::auth::TokenStore;
use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `gauth clear` command. Deletes the saved token so that the next `gauth auth` goes
/// through the consent flow. A missing token file is not an error.
pub async fn clear(config: &Config) -> Result<Out<()>> {
    let store = TokenStore::new(config.token_path());
    store
        .delete()
        .await
        .context("Unable to delete the saved token")?;
    Ok(format!("Removed the token at {}", store.path().display()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).await.unwrap();
        utils::write(config.token_path(), "{}").await.unwrap();

        clear(&config).await.unwrap();
        assert!(!config.token_path().exists());

        // Clearing again is fine
        clear(&config).await.unwrap();
    }
}
