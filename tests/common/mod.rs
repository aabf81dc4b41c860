//! An in-process mock ACME server. It scripts the CA side of one
//! issuance: directory, nonces, account, a single order with one
//! http-01 authorization, finalization and certificate download.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Method;
use hyper::Request;
use hyper::Response;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::X509Name;
use openssl::x509::X509;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Clone, Copy, PartialEq)]
pub enum Scenario {
  /// Challenge validates after two pending polls; order turns valid
  /// after one processing poll.
  Issued,
  /// The first challenge poll reports invalid.
  ChallengeRejected,
  /// The order never leaves processing.
  StuckOrder,
}

#[derive(Default)]
struct CaState {
  nonces: u64,
  account_registrations: u32,
  challenge_requests: u32,
  order_polls: u32,
}

struct Inner {
  scenario: Scenario,
  base: String,
  cert_pem: String,
  state: Mutex<CaState>,
}

pub struct MockCa {
  inner: Arc<Inner>,
  _shutdown: oneshot::Sender<()>,
}

impl MockCa {
  pub async fn start(scenario: Scenario) -> MockCa {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let inner = Arc::new(Inner {
      scenario,
      base: format!("http://{}", addr),
      cert_pem: self_signed_cert_pem(90),
      state: Mutex::new(CaState::default()),
    });

    let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
    let served = inner.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          accepted = listener.accept() => {
            let (stream, _) = match accepted {
              Ok(conn) => conn,
              Err(_) => continue,
            };
            let served = served.clone();
            let service = service_fn(move |req: Request<Incoming>| {
              let served = served.clone();
              async move {
                Ok::<_, Infallible>(
                  served.handle(req.method().clone(), req.uri().path()),
                )
              }
            });
            tokio::spawn(async move {
              let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
            });
          }
        }
      }
    });

    MockCa {
      inner,
      _shutdown: shutdown,
    }
  }

  pub fn directory_url(&self) -> String {
    format!("{}/dir", self.inner.base)
  }

  pub fn account_url(&self) -> String {
    format!("{}/acct/1", self.inner.base)
  }

  pub fn account_registrations(&self) -> u32 {
    self.inner.state.lock().unwrap().account_registrations
  }
}

impl Inner {
  fn handle(&self, method: Method, path: &str) -> Response<Full<Bytes>> {
    let nonce = {
      let mut state = self.state.lock().unwrap();
      state.nonces += 1;
      format!("nonce-{}", state.nonces)
    };
    let base = &self.base;

    let (status, location, body) = match (method.as_str(), path) {
      ("GET", "/dir") => (
        StatusCode::OK,
        None,
        json!({
          "newNonce": format!("{}/new-nonce", base),
          "newAccount": format!("{}/new-account", base),
          "newOrder": format!("{}/new-order", base),
          "revokeCert": format!("{}/revoke-cert", base),
          "keyChange": format!("{}/key-change", base),
        })
        .to_string(),
      ),
      ("HEAD", "/new-nonce") => (StatusCode::OK, None, String::new()),
      ("POST", "/new-account") => {
        self.state.lock().unwrap().account_registrations += 1;
        (
          StatusCode::CREATED,
          Some(format!("{}/acct/1", base)),
          json!({ "status": "valid" }).to_string(),
        )
      }
      ("POST", "/new-order") => (
        StatusCode::CREATED,
        Some(format!("{}/order/1", base)),
        self.order_body("pending", false),
      ),
      ("POST", "/authz/1") => (
        StatusCode::OK,
        None,
        json!({
          "identifier": { "type": "dns", "value": "example.org" },
          "status": "pending",
          "challenges": [
            {
              "type": "dns-01",
              "url": format!("{}/chall/0", base),
              "status": "pending",
              "token": "ignored"
            },
            {
              "type": "http-01",
              "url": format!("{}/chall/1", base),
              "status": "pending",
              "token": "abc"
            }
          ]
        })
        .to_string(),
      ),
      ("POST", "/chall/1") => {
        let polls = {
          let mut state = self.state.lock().unwrap();
          state.challenge_requests += 1;
          // The first request is the readiness notification.
          state.challenge_requests - 1
        };
        let status = match self.scenario {
          Scenario::ChallengeRejected if polls >= 1 => "invalid",
          Scenario::Issued if polls >= 3 => "valid",
          Scenario::StuckOrder if polls >= 1 => "valid",
          _ => "pending",
        };
        (
          StatusCode::OK,
          None,
          json!({
            "type": "http-01",
            "url": format!("{}/chall/1", base),
            "status": status,
            "token": "abc"
          })
          .to_string(),
        )
      }
      ("POST", "/order/1/finalize") => {
        (StatusCode::OK, None, self.order_body("processing", false))
      }
      ("POST", "/order/1") => {
        let polls = {
          let mut state = self.state.lock().unwrap();
          state.order_polls += 1;
          state.order_polls
        };
        if self.scenario == Scenario::StuckOrder || polls < 2 {
          (StatusCode::OK, None, self.order_body("processing", false))
        } else {
          (StatusCode::OK, None, self.order_body("valid", true))
        }
      }
      ("POST", "/cert/1") => (StatusCode::OK, None, self.cert_pem.clone()),
      _ => (
        StatusCode::NOT_FOUND,
        None,
        json!({
          "type": "urn:ietf:params:acme:error:malformed",
          "detail": format!("no route for {}", path)
        })
        .to_string(),
      ),
    };

    let mut response = Response::builder()
      .status(status)
      .header("Replay-Nonce", nonce)
      .header("Content-Type", "application/json");
    if let Some(location) = location {
      response = response.header("Location", location);
    }
    response.body(Full::new(Bytes::from(body))).unwrap()
  }

  fn order_body(&self, status: &str, issued: bool) -> String {
    let mut body = json!({
      "status": status,
      "finalize": format!("{}/order/1/finalize", self.base),
      "authorizations": [format!("{}/authz/1", self.base)],
    });
    if issued {
      body["certificate"] = json!(format!("{}/cert/1", self.base));
    }
    body.to_string()
  }
}

fn self_signed_cert_pem(days_until_expiry: u32) -> String {
  let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
  let name = {
    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_text("CN", "example.org").unwrap();
    name.build()
  };
  let mut builder = X509::builder().unwrap();
  builder.set_subject_name(&name).unwrap();
  builder.set_issuer_name(&name).unwrap();
  builder.set_pubkey(&key).unwrap();
  builder
    .set_not_before(&Asn1Time::days_from_now(0).unwrap())
    .unwrap();
  builder
    .set_not_after(&Asn1Time::days_from_now(days_until_expiry).unwrap())
    .unwrap();
  builder.sign(&key, MessageDigest::sha256()).unwrap();
  String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}
