use serde::Deserialize;

/// Everything that can go wrong while obtaining or evaluating a
/// certificate. The first failure aborts the whole issuance attempt;
/// only the two polling loops retry, and only on "not yet complete".
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A network or IO failure while reaching the CA.
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The CA returned a structured error body.
  #[error(transparent)]
  Protocol(#[from] ServerError),

  /// A successful signed exchange did not return a replay nonce.
  /// The next request could not be signed, so this is fatal.
  #[error("replay-nonce header missing from a successful response")]
  MissingNonce,

  /// Fetching the directory document or seeding the first nonce failed.
  #[error("bootstrap failed: {0}")]
  Bootstrap(String),

  /// Account registration did not yield an account URL.
  #[error("account registration failed: {0}")]
  Account(String),

  /// An authorization offered no usable http-01 challenge.
  #[error("authorization failed: {0}")]
  Authorization(String),

  /// The CA rejected a challenge. Not retried in-process: this means
  /// the responder was not reachable (DNS or port 80 misconfigured).
  #[error("domain validation failed: {0}")]
  ValidationFailed(String),

  /// The CSR could not be built or the order did not reach issuance.
  #[error("finalization failed: {0}")]
  Finalization(String),

  /// Renewal was evaluated without the persisted state it requires.
  #[error("renewal precondition not met: {0}")]
  Precondition(&'static str),

  /// A configured poll limit was exhausted before the CA finished.
  #[error("the maximum poll attempts have been exceeded")]
  MaxAttemptsExceeded,

  #[error("invalid response body: {0}")]
  Json(#[from] serde_json::Error),

  #[error("crypto error: {0}")]
  Crypto(#[from] openssl::error::ErrorStack),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// An error as reported by the ACME server (RFC 8555 problem document).
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerError {
  /// The error type URN, e.g. `urn:ietf:params:acme:error:badNonce`.
  #[serde(rename = "type")]
  pub typ: Option<String>,
  /// The human readable extra description for this error.
  pub detail: Option<String>,
  /// Per-identifier failures for a multi-identifier order.
  pub subproblems: Option<Vec<Subproblem>>,
  /// The HTTP status the error body arrived with.
  #[serde(skip)]
  pub status: u16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Subproblem {
  #[serde(rename = "type")]
  pub typ: Option<String>,
  pub detail: Option<String>,
}

const URN_PREFIX: &str = "urn:ietf:params:acme:error:";

impl ServerError {
  /// Decode a non-2xx response body. A malformed body still yields an
  /// error with a non-empty message.
  pub(crate) fn from_body(status: u16, body: &[u8]) -> ServerError {
    let mut err: ServerError = serde_json::from_slice(body).unwrap_or_default();
    if err.typ.is_none() && err.detail.is_none() {
      let raw = String::from_utf8_lossy(body).trim().to_string();
      if !raw.is_empty() {
        err.detail = Some(raw);
      }
    }
    err.status = status;
    err
  }

  /// The error type with its URN prefix stripped and mapped to a human
  /// readable reason. Unmapped codes pass through verbatim.
  pub fn reason(&self) -> String {
    match &self.typ {
      Some(typ) => {
        let code = typ.strip_prefix(URN_PREFIX).unwrap_or(typ);
        reason_for(code).unwrap_or(code).to_string()
      }
      None => "unrecognized server error".to_string(),
    }
  }
}

impl std::error::Error for ServerError {}

impl std::fmt::Display for ServerError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "acme server returned {}: {}", self.status, self.reason())?;
    if let Some(detail) = &self.detail {
      write!(f, ": {}", detail)?;
    }
    if let Some(subproblems) = &self.subproblems {
      write!(f, " (multiple problems reported:")?;
      for sub in subproblems {
        write!(f, " {};", sub.detail.clone().unwrap_or_default())?;
      }
      write!(f, ")")?;
    }
    Ok(())
  }
}

fn reason_for(code: &str) -> Option<&'static str> {
  let reason = match code {
    "accountDoesNotExist" => "the request specified an account that does not exist",
    "alreadyRevoked" => "the request specified a certificate that has already been revoked",
    "badCSR" => "the CSR is unacceptable (e.g., due to a short key)",
    "badNonce" => "the client sent an unacceptable anti-replay nonce",
    "badPublicKey" => "the JWS was signed by a public key the server does not support",
    "badRevocationReason" => "the revocation reason provided is not allowed by the server",
    "badSignatureAlgorithm" => "the JWS was signed with an algorithm the server does not support",
    "caa" => "CAA records forbid the CA from issuing a certificate",
    "compound" => "specific error conditions are indicated in the subproblems array",
    "connection" => "the server could not connect to the validation target",
    "dns" => "there was a problem with a DNS query during identifier validation",
    "externalAccountRequired" => "the request must include an externalAccountBinding field",
    "incorrectResponse" => "the response received didn't match the challenge's requirements",
    "invalidContact" => "a contact URL for the account was invalid",
    "malformed" => "the request message was malformed",
    "orderNotReady" => "the request attempted to finalize an order that is not ready",
    "rateLimited" => "the request exceeds a rate limit",
    "rejectedIdentifier" => "the server will not issue certificates for the identifier",
    "serverInternal" => "the server experienced an internal error",
    "tls" => "the server received a TLS error during validation",
    "unauthorized" => "the client lacks sufficient authorization",
    "unsupportedContact" => "a contact URL for the account used an unsupported scheme",
    "unsupportedIdentifier" => "an identifier is of an unsupported type",
    "userActionRequired" => "visit the \"instance\" URL and take the actions specified there",
    _ => return None,
  };
  Some(reason)
}
