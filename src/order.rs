use crate::client::Session;
use crate::error::Error;
use crate::helpers::b64;
use crate::helpers::certificate_from_pem;
use crate::helpers::Identifier;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use openssl::x509::X509Req;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;
use tracing::Level;

/// The status of this order. Possible values are "pending", "ready",
/// "processing", "valid", and "invalid".
#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
  Pending,
  Ready,
  Processing,
  Valid,
  Invalid,
}

/// An ACME order object represents a client's request for a certificate
/// and is used to track the progress of that order through to issuance.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  /// The order's own resource URL, taken from the newOrder response's
  /// location header. Polled during finalization.
  #[serde(skip)]
  pub(crate) url: String,

  /// The status of this order.
  pub status: OrderStatus,
  /// The authorizations the client needs to complete before the
  /// requested certificate can be issued.
  #[serde(rename = "authorizations")]
  pub(crate) authorization_urls: Vec<String>,
  /// A URL that a CSR must be POSTed to once all of the order's
  /// authorizations are satisfied.
  #[serde(rename = "finalize")]
  pub(crate) finalize_url: String,
  /// A URL for the certificate that has been issued in response to
  /// this order. Populated only after issuance.
  #[serde(rename = "certificate")]
  pub(crate) certificate_url: Option<String>,
}

impl Order {
  /// Create an order for the bare domain and its `www.` variant.
  #[instrument(level = Level::INFO, name = "acme_provision::Order::create", err, skip(session))]
  pub(crate) async fn create(
    session: &Session,
    domain: &str,
  ) -> Result<Order, Error> {
    let payload = json!({
      "identifiers": [
        Identifier::dns(format!("www.{}", domain)),
        Identifier::dns(domain),
      ],
    });

    let url = session.directory.new_order_url.clone();
    let (headers, body) = session.send(&url, &payload.to_string()).await?;

    let mut order: Order = serde_json::from_slice(&body)?;
    order.url = headers
      .get(reqwest::header::LOCATION)
      .and_then(|value| value.to_str().ok())
      .ok_or_else(|| {
        Error::Finalization(
          "newOrder response carried no location header".to_string(),
        )
      })?
      .to_string();

    Ok(order)
  }

  /// Submit the CSR bound to the domain key to the finalize URL.
  #[instrument(level = Level::INFO, name = "acme_provision::Order::finalize", err, skip_all, fields(url = %self.finalize_url))]
  pub(crate) async fn finalize(
    &self,
    session: &Session,
    domain_key: &PKey<Private>,
    domain: &str,
    organisation: &str,
  ) -> Result<(), Error> {
    let csr = gen_csr(domain_key, domain, organisation)?;
    let csr_b64 = b64(&csr.to_der()?);

    session
      .send(&self.finalize_url, &json!({ "csr": csr_b64 }).to_string())
      .await?;
    Ok(())
  }

  /// Re-fetch this order from its resource URL.
  pub(crate) async fn poll(&self, session: &Session) -> Result<Order, Error> {
    let (_, body) = session.send(&self.url, "").await?;
    let mut order: Order = serde_json::from_slice(&body)?;
    order.url = self.url.clone();
    debug!(url = %self.url, status = ?order.status, "polled order");
    Ok(order)
  }

  /// Poll the order at a fixed interval until the CA reports it valid,
  /// i.e. the certificate has been issued. `limit` caps the number of
  /// polls; `None` trusts the CA to terminate.
  pub(crate) async fn poll_issued(
    self,
    session: &Session,
    interval: Duration,
    limit: Option<u32>,
  ) -> Result<Order, Error> {
    let mut order = self;
    let mut attempts = 0u32;

    while order.status != OrderStatus::Valid {
      if order.status == OrderStatus::Invalid {
        return Err(Error::Finalization(
          "the order was marked invalid by the server".to_string(),
        ));
      }
      attempts += 1;
      if let Some(limit) = limit {
        if attempts > limit {
          return Err(Error::MaxAttemptsExceeded);
        }
      }
      tokio::time::sleep(interval).await;
      order = order.poll(session).await?;
    }

    Ok(order)
  }

  /// Download the issued certificate and return it as a PEM string.
  pub(crate) async fn download_certificate(
    &self,
    session: &Session,
  ) -> Result<String, Error> {
    let url = self.certificate_url.as_ref().ok_or_else(|| {
      Error::Finalization(
        "the order carries no certificate url".to_string(),
      )
    })?;

    let (_, body) = session.send(url, "").await?;
    let pem = String::from_utf8_lossy(&body).into_owned();
    // Reject bodies that do not decode as a certificate before the
    // caller persists them.
    certificate_from_pem(&pem)?;
    Ok(pem)
  }
}

/// Build the PKCS#10 request binding the domain key: subject CN is the
/// domain, organization fields come from the caller, and both the bare
/// and `www.` names are carried as SANs.
fn gen_csr(
  key: &PKey<Private>,
  domain: &str,
  organisation: &str,
) -> Result<X509Req, Error> {
  let mut builder = X509Req::builder()?;

  let name = {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", domain)?;
    name.append_entry_by_text("O", organisation)?;
    name.append_entry_by_text("OU", &format!("{} - {}", domain, organisation))?;
    name.build()
  };
  builder.set_subject_name(&name)?;

  let san_extension = {
    let mut san = SubjectAlternativeName::new();
    san.dns(domain);
    san.dns(&format!("www.{}", domain));
    san.build(&builder.x509v3_context(None))?
  };
  let mut stack = Stack::new()?;
  stack.push(san_extension)?;
  builder.add_extensions(&stack)?;

  builder.set_pubkey(key)?;
  builder.sign(key, MessageDigest::sha256())?;

  Ok(builder.build())
}
