use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the home directory and:
/// - Creates an initial `config.json` file using `scopes` and `port` along with default settings
/// - Copies `secret_file` into its default location in the home directory.
///
/// # Arguments
/// - `home` - The directory that will be the gauth home directory, e.g. `$HOME/.gauth`
/// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON needed to start the Google
///   OAuth workflow. This will be copied from the `secret_file` path to its default location and
///   name in the home directory.
/// - `scopes` - The scopes the token must grant. The calendar scope is used when empty.
/// - `port` - The port of the `http://localhost:{port}/` redirect URI registered for the client.
///
/// # Errors
/// - Returns an error if any file operations fail.
pub async fn init(
    home: &Path,
    secret_file: &Path,
    scopes: &[String],
    port: Option<u16>,
) -> Result<Out<()>> {
    let config = Config::create(home, secret_file, scopes.to_vec(), port)
        .await
        .context("Unable to create the home directory and configs")?;
    Ok(format!(
        "Successfully created the gauth home directory at {}",
        config.root().display()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::secret_file;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init() {
        let dir = TempDir::new().unwrap();
        let secret = secret_file(dir.path());
        let home = dir.path().join("home");
        let out = init(&home, &secret, &[], Some(8085)).await.unwrap();
        assert!(out.message().contains("Successfully created"));

        let config = Config::load(&home).await.unwrap();
        assert_eq!(8085, config.redirect_port());
        assert!(config.client_secret_path().is_file());
        assert!(!config.token_path().exists());
    }

    #[tokio::test]
    async fn test_init_missing_secret() {
        let dir = TempDir::new().unwrap();
        let result = init(
            &dir.path().join("home"),
            &dir.path().join("nope.json"),
            &[],
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
