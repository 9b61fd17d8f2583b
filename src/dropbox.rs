//! Dropbox HTTP API v2 client
//!
//! Implements [RemoteStorage] with blocking requests. Short-lived access
//! tokens are obtained from the stored refresh token and renewed once when a
//! request is rejected with 401.

use std::{cell::RefCell, time::Duration};

use log::debug;
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    config::Credentials,
    remote::{FolderSnapshot, Fingerprint, RemoteError, RemoteFile, RemoteStorage},
};

const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";
const DEFAULT_AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Token endpoint client for the app identified by `app_key`
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    api_base: Url,
    authorize_url: Url,
    app_key: String,
    app_secret: String,
}

impl OAuthClient {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Self::with_base_urls(DEFAULT_API_URL, DEFAULT_AUTHORIZE_URL, app_key, app_secret)
    }

    pub fn with_base_urls(
        api_base: &str,
        authorize_url: &str,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_base: Url::parse(api_base)?,
            authorize_url: Url::parse(authorize_url)?,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        })
    }

    /// URL the user visits to grant access; offline access yields a refresh token
    pub fn authorize_url(&self) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.app_key)
            .append_pair("response_type", "code")
            .append_pair("token_access_type", "offline");
        url
    }

    /// Exchange the code shown to the user after the grant
    pub fn exchange_code(&self, code: &str) -> Result<OAuthToken, RemoteError> {
        self.token_request(&[("grant_type", "authorization_code"), ("code", code)])
    }

    /// Obtain a fresh access token
    pub fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, RemoteError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
    }

    fn token_request(&self, params: &[(&str, &str)]) -> Result<OAuthToken, RemoteError> {
        let url = self.api_base.join("/oauth2/token")?;
        let mut form = params.to_vec();
        form.push(("client_id", self.app_key.as_str()));
        form.push(("client_secret", self.app_secret.as_str()));

        let response = self.http.post(url).form(&form).send()?;
        if response.status().is_success() {
            Ok(response.json::<OAuthToken>()?)
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(RemoteError::Api { status, body })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Dropbox client for one authorized account
pub struct DropboxClient {
    http: Client,
    api_base: Url,
    content_base: Url,
    oauth: OAuthClient,
    refresh_token: Option<String>,
    access_token: RefCell<Option<String>>,
}

impl DropboxClient {
    pub fn new(credentials: &Credentials) -> Result<Self, RemoteError> {
        Self::with_base_urls(
            DEFAULT_API_URL,
            DEFAULT_CONTENT_URL,
            DEFAULT_AUTHORIZE_URL,
            credentials,
        )
    }

    pub fn with_base_urls(
        api_base: &str,
        content_base: &str,
        authorize_url: &str,
        credentials: &Credentials,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_base: Url::parse(api_base)?,
            content_base: Url::parse(content_base)?,
            oauth: OAuthClient::with_base_urls(
                api_base,
                authorize_url,
                &credentials.app_key,
                &credentials.app_secret,
            )?,
            refresh_token: credentials.refresh_token.clone(),
            access_token: RefCell::new(credentials.access_token.clone()),
        })
    }

    fn list_folder(&self, folder: &str) -> Result<Vec<Metadata>, RemoteError> {
        let mut page: ListFolderResult = self
            .rpc(
                "/2/files/list_folder",
                &json!({ "path": folder_arg(folder), "recursive": false }),
                folder,
            )?
            .json()?;
        let mut entries = std::mem::take(&mut page.entries);

        while page.has_more {
            page = self
                .rpc(
                    "/2/files/list_folder/continue",
                    &json!({ "cursor": page.cursor }),
                    folder,
                )?
                .json()?;
            entries.append(&mut page.entries);
        }

        Ok(entries)
    }

    fn rpc(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        path: &str,
    ) -> Result<Response, RemoteError> {
        let url = self.api_base.join(endpoint)?;
        self.send_authorized(path, |token| {
            self.http.post(url.clone()).bearer_auth(token).json(body)
        })
    }

    /// Send the request built by `build`, renewing the access token once if
    /// it was rejected
    fn send_authorized(
        &self,
        path: &str,
        build: impl Fn(&str) -> RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let token = self.access_token()?;
        let mut response = build(&token).send()?;

        if response.status() == StatusCode::UNAUTHORIZED && self.refresh_token.is_some() {
            debug!("Access token rejected, refreshing");
            let token = self.refresh_access_token()?;
            response = build(&token).send()?;
        }

        check_response(response, path)
    }

    fn access_token(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.access_token.borrow().clone() {
            return Ok(token);
        }
        self.refresh_access_token()
    }

    fn refresh_access_token(&self) -> Result<String, RemoteError> {
        let Some(refresh_token) = &self.refresh_token else {
            return Err(RemoteError::Api {
                status: StatusCode::UNAUTHORIZED,
                body: "no refresh token available".into(),
            });
        };
        let token = self.oauth.refresh(refresh_token)?;
        self.access_token.replace(Some(token.access_token.clone()));
        Ok(token.access_token)
    }
}

impl RemoteStorage for DropboxClient {
    fn snapshot(&self, folder: &str) -> Result<FolderSnapshot, RemoteError> {
        let mut entries = self.list_folder(folder)?;
        entries.retain(|e| !matches!(e, Metadata::Deleted { .. }));
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        let fingerprint = Fingerprint::from_entries(entries.iter().map(|e| (e.name(), e.rev())));
        let entries = entries
            .into_iter()
            .map(|e| RemoteFile {
                is_dir: matches!(e, Metadata::Folder { .. }),
                name: e.into_name(),
            })
            .collect();

        Ok(FolderSnapshot {
            fingerprint,
            entries,
        })
    }

    fn move_file(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.rpc(
            "/2/files/move_v2",
            &json!({ "from_path": from, "to_path": to, "autorename": false }),
            from,
        )?;
        Ok(())
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.content_base.join("/2/files/download")?;
        let arg = api_arg(&json!({ "path": path }));
        let response = self.send_authorized(path, |token| {
            self.http
                .post(url.clone())
                .bearer_auth(token)
                .header("Dropbox-API-Arg", arg.as_str())
        })?;
        Ok(response.bytes()?.to_vec())
    }

    fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.rpc("/2/files/delete_v2", &json!({ "path": path }), path)?;
        Ok(())
    }
}

/// Map failed responses to [RemoteError].
///
/// Dropbox reports missing paths as 409 with a `.../not_found/...` summary.
fn check_response(response: Response, path: &str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    if status == StatusCode::NOT_FOUND
        || (status == StatusCode::CONFLICT && is_not_found_summary(&body))
    {
        return Err(RemoteError::NotFound {
            path: path.to_owned(),
        });
    }

    Err(RemoteError::Api { status, body })
}

fn is_not_found_summary(body: &str) -> bool {
    #[derive(Deserialize)]
    struct ApiError {
        error_summary: String,
    }

    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error_summary.contains("not_found"))
        .unwrap_or(false)
}

/// Dropbox addresses the root folder as `""` and rejects trailing slashes
fn folder_arg(folder: &str) -> &str {
    folder.trim_end_matches('/')
}

/// Serialize the `Dropbox-API-Arg` header, which must be pure ASCII
fn api_arg(value: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File { name: String, rev: String },
    Folder { name: String },
    Deleted { name: String },
}

impl Metadata {
    fn name(&self) -> &str {
        match self {
            Metadata::File { name, .. } | Metadata::Folder { name } | Metadata::Deleted { name } => {
                name
            }
        }
    }

    fn rev(&self) -> &str {
        match self {
            Metadata::File { rev, .. } => rev,
            _ => "",
        }
    }

    fn into_name(self) -> String {
        match self {
            Metadata::File { name, .. } | Metadata::Folder { name } | Metadata::Deleted { name } => {
                name
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/Kamera/café.jpg" }));
        assert_eq!(arg, r#"{"path":"/Kamera/caf\u00e9.jpg"}"#);
    }

    #[test]
    fn recognizes_not_found_summaries() {
        assert!(is_not_found_summary(
            r#"{"error_summary": "path_lookup/not_found/..", "error": {}}"#
        ));
        assert!(!is_not_found_summary(
            r#"{"error_summary": "to/conflict/file/..", "error": {}}"#
        ));
        assert!(!is_not_found_summary("not json"));
    }

    #[test]
    fn root_folder_is_empty_string() {
        assert_eq!(folder_arg("/"), "");
        assert_eq!(folder_arg("/Apps/Ninja Blocks/"), "/Apps/Ninja Blocks");
    }
}
