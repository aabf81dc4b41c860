use crate::error::Error;
use crate::error::ServerError;
use crate::jws::jws;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

/// Fetches the CA's directory document and seeds the first anti-replay
/// nonce, producing a ready-to-use [`Directory`].
pub struct DirectoryBuilder {
  url: String,
  http_client: Option<reqwest::Client>,
}

impl DirectoryBuilder {
  pub fn new(url: String) -> Self {
    DirectoryBuilder {
      url,
      http_client: None,
    }
  }

  /// Use a custom [`reqwest::Client`] for every exchange with the CA,
  /// e.g. one that trusts a private test CA's root.
  pub fn http_client(&mut self, http_client: reqwest::Client) -> &mut Self {
    self.http_client = Some(http_client);
    self
  }

  /// Fetch the directory document, then probe the newNonce URL to seed
  /// the session nonce. The signed transport cannot sign its first
  /// request without that seed, so both steps must succeed here.
  pub async fn build(&mut self) -> Result<Arc<Directory>, Error> {
    let http_client = self
      .http_client
      .clone()
      .unwrap_or_else(reqwest::Client::new);

    let resp = http_client.get(&self.url).send().await.map_err(|err| {
      Error::Bootstrap(format!(
        "could not reach directory url '{}': {}",
        self.url, err
      ))
    })?;
    if !resp.status().is_success() {
      return Err(Error::Bootstrap(format!(
        "directory url '{}' returned {}",
        self.url,
        resp.status()
      )));
    }

    let mut dir: Directory = resp.json().await.map_err(|err| {
      Error::Bootstrap(format!("could not parse directory document: {}", err))
    })?;
    dir.http_client = http_client;

    let resp = dir
      .http_client
      .head(&dir.new_nonce_url)
      .send()
      .await
      .map_err(|err| {
        Error::Bootstrap(format!("could not fetch a first nonce: {}", err))
      })?;
    if !resp.status().is_success() {
      return Err(Error::Bootstrap(format!(
        "newNonce probe returned {}",
        resp.status()
      )));
    }

    let nonce = resp
      .headers()
      .get("replay-nonce")
      .and_then(|value| value.to_str().ok())
      .filter(|nonce| !nonce.is_empty())
      .ok_or_else(|| {
        Error::Bootstrap("newNonce probe returned an empty nonce".to_string())
      })?;
    dir.nonce = Mutex::new(nonce.to_string());

    Ok(Arc::new(dir))
  }
}

/// The CA's mapping of protocol operation to endpoint URL, fetched once
/// per client lifetime, plus the transport state shared by every signed
/// request: the HTTP client and the single-use anti-replay nonce.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
  #[serde(skip)]
  pub(crate) http_client: reqwest::Client,
  #[serde(skip)]
  pub(crate) nonce: Mutex<String>,
  #[serde(rename = "newNonce")]
  pub new_nonce_url: String,
  #[serde(rename = "newAccount")]
  pub new_account_url: String,
  #[serde(rename = "newOrder")]
  pub new_order_url: String,
  #[serde(rename = "keyChange")]
  pub key_change_url: Option<String>,
  #[serde(rename = "revokeCert")]
  pub revoke_cert_url: Option<String>,
  #[serde(rename = "renewalInfo")]
  pub renewal_info_url: Option<String>,
}

impl Directory {
  /// Send one signed request. The envelope embeds the public key when
  /// the target is the newAccount URL and the account identifier
  /// otherwise. On any response the returned Replay-Nonce, if present,
  /// replaces the stored nonce; a successful response without one is an
  /// [`Error::MissingNonce`].
  pub(crate) async fn signed_request(
    &self,
    url: &str,
    payload: &str,
    key: &PKey<Private>,
    kid: Option<&str>,
  ) -> Result<(reqwest::header::HeaderMap, Vec<u8>), Error> {
    let nonce = self.nonce.lock().unwrap().clone();
    let kid = if url == self.new_account_url { None } else { kid };
    let body = jws(url, &nonce, payload, key, kid)?;

    let resp = self
      .http_client
      .post(url)
      .header(reqwest::header::CONTENT_TYPE, "application/jose+json")
      .body(body)
      .send()
      .await?;

    let status = resp.status();
    let headers = resp.headers().clone();

    let mut rotated = false;
    if let Some(nonce) = headers
      .get("replay-nonce")
      .and_then(|value| value.to_str().ok())
    {
      *self.nonce.lock().unwrap() = nonce.to_string();
      rotated = true;
    }
    debug!(url, status = %status, rotated, "signed exchange");

    let body = resp.bytes().await?.to_vec();

    if !status.is_success() {
      return Err(ServerError::from_body(status.as_u16(), &body).into());
    }
    if !rotated {
      return Err(Error::MissingNonce);
    }

    Ok((headers, body))
  }
}
