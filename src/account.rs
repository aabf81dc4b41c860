use crate::client::Session;
use crate::error::Error;
use serde_json::json;
use tracing::instrument;
use tracing::Level;

/// Register an account for the given contact address and return the
/// account URL the CA assigned (the `kid` of every later request).
///
/// Registration is idempotent on the CA side for a fixed account key,
/// but the orchestrator skips this call entirely when a persisted kid
/// is supplied.
#[instrument(level = Level::INFO, name = "acme_provision::account::register", err, skip(session))]
pub(crate) async fn register(
  session: &Session,
  email: &str,
) -> Result<String, Error> {
  let payload = json!({
    "termsOfServiceAgreed": true,
    "contact": [format!("mailto:{}", email)],
  });

  let url = session.directory.new_account_url.clone();
  let (headers, _) = session.send(&url, &payload.to_string()).await?;

  let kid = headers
    .get(reqwest::header::LOCATION)
    .and_then(|value| value.to_str().ok())
    .filter(|location| !location.is_empty())
    .ok_or_else(|| {
      Error::Account(
        "newAccount response carried no location header".to_string(),
      )
    })?;

  Ok(kid.to_string())
}
