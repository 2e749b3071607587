//! OAuth2 installed-app flow and token cache for the Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;

use crate::error::{CleanupError, Result};

/// Read/write access without permanent deletion, plus label management
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
pub const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Where users can revoke the app's access entirely
pub const REVOKE_URL: &str = "https://myaccount.google.com/permissions";

pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Setup steps shown when the OAuth client file is missing
pub const CREDENTIALS_HELP: &str = "\
To set up Gmail access:
  1. Go to console.cloud.google.com
  2. Create a project and enable the Gmail API
  3. Create OAuth 2.0 Credentials (Desktop app)
  4. Download the file and save it as 'credentials.json'
  5. Run `inbox-cleanup auth`; a browser window will open for sign-in";

/// Initialize the Gmail API hub, running the browser sign-in if no valid
/// token is cached at `token_cache_path`.
pub async fn initialize_gmail_hub(credentials_path: &Path, token_cache_path: &Path) -> Result<GmailHub> {
    if !credentials_path.exists() {
        return Err(CleanupError::ConfigError(format!(
            "'{}' not found.\n\n{}",
            credentials_path.display(),
            CREDENTIALS_HELP
        )));
    }

    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| CleanupError::ConfigError(format!("Failed to read credentials: {}", e)))?;

    if let Some(parent) = token_cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| CleanupError::auth_expired(format!("Failed to build authenticator: {}", e)))?;

    // Fetch once up front so the cached token carries every scope we use
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| CleanupError::auth_expired(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| CleanupError::ConfigError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    tracing::debug!("Gmail hub initialized with token cache {:?}", token_cache_path);
    Ok(Gmail::new(client, auth))
}

/// Delete the cached token so the next run requires sign-in.
///
/// Returns `false` when there was no token to delete.
pub async fn signout(token_cache_path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(token_cache_path).await {
        Ok(()) => {
            tracing::info!("Removed token cache {:?}", token_cache_path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Restrict the token file to its owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
