use crate::client::Session;
use crate::error::Error;
use crate::helpers::Identifier;
use crate::jws::thumbprint;
use crate::order::Order;
use serde::Deserialize;
use tracing::debug;

/// The status of an [`Authorization`]. Possible values are "pending",
/// "valid", "invalid", "deactivated", "expired", and "revoked".
#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
  Pending,
  Valid,
  Invalid,
  Deactivated,
  Expired,
  Revoked,
}

/// An ACME authorization object represents a server's authorization
/// for an account to represent an identifier: the set of proofs the
/// CA is willing to accept for one domain.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
  /// The identifier that the account is authorized to represent.
  pub identifier: Identifier,
  /// The status of this authorization.
  pub status: AuthorizationStatus,
  /// The challenges the client can fulfill in order to prove
  /// possession of the identifier.
  pub challenges: Vec<Challenge>,
}

impl Authorization {
  /// The first offered challenge of the given type, if any.
  pub fn take_challenge(self, typ: &str) -> Option<Challenge> {
    self.challenges.into_iter().find(|c| c.typ == typ)
  }
}

/// The status of a [`Challenge`]. Possible values are "pending",
/// "processing", "valid", and "invalid".
#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeStatus {
  Pending,
  Processing,
  Valid,
  Invalid,
}

impl ChallengeStatus {
  pub(crate) fn is_terminal(&self) -> bool {
    matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
  }
}

/// One specific proof mechanism within an authorization.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  /// The type of challenge encoded in the object.
  #[serde(rename = "type")]
  pub typ: String,
  /// The URL to which a response can be posted.
  pub url: String,
  /// The status of this challenge.
  pub status: ChallengeStatus,
  /// A random value that uniquely identifies the challenge.
  pub token: String,
  /// The derived proof value served by the local responder. Never
  /// supplied by the server.
  #[serde(skip)]
  pub key_authorization: String,
}

impl Challenge {
  /// Re-fetch this challenge's current state from the CA.
  pub(crate) async fn poll(&self, session: &Session) -> Result<Challenge, Error> {
    let (_, body) = session.send(&self.url, "").await?;
    let mut polled: Challenge = serde_json::from_slice(&body)?;
    polled.key_authorization = self.key_authorization.clone();
    debug!(url = %self.url, status = ?polled.status, "polled challenge");
    Ok(polled)
  }
}

/// Fetch every authorization of the order and select, per domain
/// identifier, its http-01 challenge with the key-authorization value
/// derived from the account key's JWK thumbprint.
pub(crate) async fn fetch_challenges(
  session: &Session,
  order: &Order,
) -> Result<Vec<Challenge>, Error> {
  let thumbprint = thumbprint(&session.account_key)?;
  let mut challenges = Vec::new();

  for url in &order.authorization_urls {
    let (_, body) = session.send(url, "").await?;
    let authorization: Authorization =
      serde_json::from_slice(&body).map_err(|err| {
        Error::Authorization(format!(
          "could not parse authorization resource '{}': {}",
          url, err
        ))
      })?;

    let domain = authorization.identifier.value.clone();
    let mut challenge =
      authorization.take_challenge("http-01").ok_or_else(|| {
        Error::Authorization(format!(
          "no http-01 challenge offered for '{}'",
          domain
        ))
      })?;

    challenge.key_authorization =
      format!("{}.{}", challenge.token, thumbprint);
    challenges.push(challenge);
  }

  Ok(challenges)
}
