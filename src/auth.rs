//! OAuth2 bootstrap for the Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;
use tracing::{debug, info};

use crate::client::GmailHub;
use crate::error::{GmailError, Result};

/// Scopes the labeller asks for: read/modify messages and manage labels
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Build an authenticated Gmail hub
///
/// Uses the installed-app flow (browser redirect) on first use and persists
/// the token to `token_cache_path`; later runs refresh it silently.
pub async fn initialize_gmail_hub(credentials_path: &Path, token_cache_path: &Path) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| {
            GmailError::AuthError(format!(
                "Failed to read credentials from {:?}: {}",
                credentials_path, e
            ))
        })?;

    if let Some(parent) = token_cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Fetch once up front so the cached token carries every scope we need
    auth.token(SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;
    secure_token_file(token_cache_path).await?;
    debug!("OAuth token cached at {:?}", token_cache_path);

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Forget any cached token so the next hub initialization re-runs the flow
pub async fn reset_token_cache(token_cache_path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(token_cache_path).await {
        Ok(()) => {
            info!("Removed cached token at {:?}", token_cache_path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Email address of the authenticated account
pub async fn account_email(hub: &GmailHub) -> Result<String> {
    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(SCOPES[0])
        .doit()
        .await?;

    profile
        .email_address
        .ok_or_else(|| GmailError::AuthError("Profile has no email address".to_string()))
}

/// Restrict the token file to its owner
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.exists() {
        return Ok(());
    }
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
