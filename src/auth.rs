//! One-time authorization of the Dropbox app
//!
//! Once the user granted access, the tokens are written to the credential
//! file and every later start reuses them.

use std::{
    io::{self, BufRead, Write},
    path::Path,
};

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    config::{Config, Credentials},
    dropbox::{OAuthClient, OAuthToken},
};

/// Obtains tokens for an app which has not been authorized yet
pub trait CredentialProvisioner {
    fn provision(&self, credentials: &Credentials) -> Result<OAuthToken>;
}

/// Authorization through the console: print the grant URL, read the code the
/// user pastes back
pub struct ConsoleProvisioner;

impl CredentialProvisioner for ConsoleProvisioner {
    fn provision(&self, credentials: &Credentials) -> Result<OAuthToken> {
        let oauth = OAuthClient::new(&credentials.app_key, &credentials.app_secret)?;

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "url: {}", oauth.authorize_url())?;
        writeln!(
            stdout,
            "Please visit this website, press 'Allow' and paste the code here."
        )?;
        stdout.flush()?;

        let mut code = String::new();
        io::stdin().lock().read_line(&mut code)?;
        let code = code.trim();
        if code.is_empty() {
            bail!("no authorization code entered");
        }

        oauth
            .exchange_code(code)
            .context("failed to exchange authorization code")
    }
}

/// Make sure `config` carries tokens, provisioning and persisting them to
/// `path` if it does not
pub fn ensure_authorized(
    path: &Path,
    config: &mut Config,
    provisioner: &impl CredentialProvisioner,
) -> Result<()> {
    if config.general.is_authorized() {
        return Ok(());
    }

    info!("No stored access token, starting authorization");
    let token = provisioner.provision(&config.general)?;
    if token.refresh_token.is_none() {
        info!("Grant did not include a refresh token, storing the access token");
    }
    config.general.access_token = Some(token.access_token);
    config.general.refresh_token = token.refresh_token;

    config.save(path)?;
    info!("Stored credentials in {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, fs};

    use tempfile::TempDir;

    use super::*;

    struct FakeProvisioner {
        calls: Cell<usize>,
    }

    impl CredentialProvisioner for FakeProvisioner {
        fn provision(&self, _credentials: &Credentials) -> Result<OAuthToken> {
            self.calls.set(self.calls.get() + 1);
            Ok(OAuthToken {
                access_token: "access".into(),
                token_type: "bearer".into(),
                expires_in: Some(14400),
                refresh_token: Some("refresh".into()),
            })
        }
    }

    fn config(refresh_token: Option<&str>) -> Config {
        Config {
            general: Credentials {
                app_key: "key".into(),
                app_secret: "secret".into(),
                refresh_token: refresh_token.map(Into::into),
                access_token: None,
            },
        }
    }

    #[test]
    fn provisions_and_persists_missing_tokens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("webcam.toml");
        let provisioner = FakeProvisioner { calls: Cell::new(0) };
        let mut config = config(None);

        ensure_authorized(&path, &mut config, &provisioner).unwrap();

        assert_eq!(provisioner.calls.get(), 1);
        assert_eq!(config.general.refresh_token.as_deref(), Some("refresh"));
        let stored = Config::try_load(&path).unwrap();
        assert_eq!(stored.general.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(stored.general.app_key, "key");
    }

    #[test]
    fn stored_tokens_skip_provisioning() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("webcam.toml");
        let provisioner = FakeProvisioner { calls: Cell::new(0) };
        let mut config = config(Some("stored"));

        ensure_authorized(&path, &mut config, &provisioner).unwrap();

        assert_eq!(provisioner.calls.get(), 0);
        assert_eq!(config.general.refresh_token.as_deref(), Some("stored"));
        assert!(fs::metadata(&path).is_err());
    }
}
