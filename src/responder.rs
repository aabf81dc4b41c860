use crate::authorization::Challenge;
use crate::authorization::ChallengeStatus;
use crate::client::Session;
use crate::error::Error;
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
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;
use tracing::Level;

const WELL_KNOWN_PREFIX: &str = "/.well-known/acme-challenge/";

/// The ephemeral local HTTP server that proves domain control: it
/// answers `GET /.well-known/acme-challenge/{token}` with the matching
/// key-authorization value for as long as validation runs.
///
/// The responder owns the listening socket for the duration of the
/// challenge phase only; [`ChallengeResponder::stop`] must run on every
/// exit path.
pub(crate) struct ChallengeResponder {
  local_addr: SocketAddr,
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

impl ChallengeResponder {
  /// Bind the listener and start serving the challenge table as an
  /// independent task.
  pub(crate) async fn start(
    addr: SocketAddr,
    challenges: &[Challenge],
  ) -> Result<ChallengeResponder, Error> {
    let table: Arc<HashMap<String, String>> = Arc::new(
      challenges
        .iter()
        .map(|c| (c.token.clone(), c.key_authorization.clone()))
        .collect(),
    );

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          accepted = listener.accept() => {
            let (stream, peer) = match accepted {
              Ok(conn) => conn,
              Err(err) => {
                debug!(%err, "challenge responder accept failed");
                continue;
              }
            };
            debug!(%peer, "challenge responder connection");
            let table = table.clone();
            let service = service_fn(move |req: Request<Incoming>| {
              let table = table.clone();
              async move { Ok::<_, Infallible>(respond(&table, &req)) }
            });
            tokio::spawn(async move {
              let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
            });
          }
        }
      }
      // Dropping the listener here releases the socket.
    });

    Ok(ChallengeResponder {
      local_addr,
      shutdown,
      task,
    })
  }

  pub(crate) fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Stop accepting connections and release the socket.
  pub(crate) async fn stop(self) {
    let _ = self.shutdown.send(());
    let _ = self.task.await;
  }
}

fn respond(
  table: &HashMap<String, String>,
  req: &Request<Incoming>,
) -> Response<Full<Bytes>> {
  if req.method() == Method::GET {
    if let Some(token) = req.uri().path().strip_prefix(WELL_KNOWN_PREFIX) {
      if let Some(key_authorization) = table.get(token) {
        return Response::new(Full::new(Bytes::from(
          key_authorization.clone(),
        )));
      }
    }
  }

  let mut not_found = Response::new(Full::new(Bytes::new()));
  *not_found.status_mut() = StatusCode::NOT_FOUND;
  not_found
}

/// Sleep between incomplete polling sweeps: doubles from one second and
/// caps at sixteen. The attempt counter never resets.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
  Duration::from_secs(1 << attempt.saturating_sub(1).min(4))
}

/// Signal readiness for every challenge, then poll each one to a
/// terminal state. An `invalid` report aborts immediately: the CA will
/// not re-validate, and the fix (DNS record, open port 80) lies with
/// the operator.
#[instrument(level = Level::INFO, name = "acme_provision::responder::solve", err, skip_all, fields(challenges = challenges.len()))]
pub(crate) async fn solve(
  session: &Session,
  challenges: &mut [Challenge],
) -> Result<(), Error> {
  for challenge in challenges.iter() {
    session.send(&challenge.url, "{}").await?;
  }

  let mut attempt = 0u32;
  loop {
    for challenge in challenges.iter_mut() {
      if challenge.status.is_terminal() {
        continue;
      }
      let polled = challenge.poll(session).await?;
      if polled.status == ChallengeStatus::Invalid {
        return Err(Error::ValidationFailed(format!(
          "the server rejected the challenge for token '{}'; check your \
           dns records and that port 80 is reachable",
          challenge.token
        )));
      }
      challenge.status = polled.status;
    }

    if challenges
      .iter()
      .all(|challenge| challenge.status == ChallengeStatus::Valid)
    {
      return Ok(());
    }

    attempt += 1;
    let delay = backoff_delay(attempt);
    debug!(?delay, attempt, "challenges not yet valid, backing off");
    tokio::time::sleep(delay).await;
  }
}
