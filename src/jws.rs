use crate::error::Error;
use crate::helpers::b64;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::sign::Signer;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize, Deserialize, Clone, Default)]
struct JwsHeader {
  alg: String,
  nonce: String,
  url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  kid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  jwk: Option<Jwk>,
}

/// The RFC 7638 canonical form of an RSA public key. Field order
/// matters: the thumbprint hashes the serialization of exactly
/// `{"e":..,"kty":..,"n":..}`.
#[derive(Serialize, Deserialize, Clone, Default)]
pub(crate) struct Jwk {
  e: String,
  kty: String,
  n: String,
}

impl Jwk {
  pub fn new(key: &PKey<Private>) -> Result<Jwk, Error> {
    let rsa = key.rsa()?;
    // BigNum::to_vec yields the big-endian minimal-length bytes the
    // JWK encoding requires.
    Ok(Jwk {
      e: b64(&rsa.e().to_vec()),
      kty: "RSA".to_string(),
      n: b64(&rsa.n().to_vec()),
    })
  }
}

/// The base64url SHA-256 digest of the account key's canonical JWK,
/// the account-key half of every key-authorization value.
pub(crate) fn thumbprint(key: &PKey<Private>) -> Result<String, Error> {
  let jwk = serde_json::to_string(&Jwk::new(key)?)?;
  let digest = hash(MessageDigest::sha256(), jwk.as_bytes())?;
  Ok(b64(&digest))
}

/// Build the signed envelope for one request. The public key is
/// embedded (`jwk`) only when no account identifier exists yet, i.e.
/// for the newAccount call; every later call names the account (`kid`).
pub(crate) fn jws(
  url: &str,
  nonce: &str,
  payload: &str,
  key: &PKey<Private>,
  kid: Option<&str>,
) -> Result<String, Error> {
  let payload_b64 = b64(payload.as_bytes());

  let mut header = JwsHeader {
    alg: "RS256".to_string(),
    nonce: nonce.to_string(),
    url: url.to_string(),
    ..Default::default()
  };

  match kid {
    Some(kid) => header.kid = Some(kid.to_string()),
    None => header.jwk = Some(Jwk::new(key)?),
  }

  let protected_b64 = b64(&serde_json::to_string(&header)?.into_bytes());

  let signature_b64 = {
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(format!("{}.{}", protected_b64, payload_b64).as_bytes())?;
    b64(&signer.sign_to_vec()?)
  };

  Ok(serde_json::to_string(&json!({
    "protected": protected_b64,
    "payload": payload_b64,
    "signature": signature_b64
  }))?)
}
