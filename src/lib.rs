//! An ACME (RFC 8555) client that obtains a domain-validated TLS
//! certificate over the http-01 challenge, for services that provision
//! their own certificates. The caller supplies a domain, a contact
//! address and an organisation name, persists the opaque key and
//! certificate strings this crate hands back, and periodically asks
//! [`AcmeClient::needs_renewal`] whether to reissue.

mod account;
mod authorization;
mod client;
mod directory;
mod error;
mod helpers;
mod jws;
mod order;
mod responder;

pub use authorization::Authorization;
pub use authorization::AuthorizationStatus;
pub use authorization::Challenge;
pub use authorization::ChallengeStatus;
pub use client::AcmeClient;
pub use client::InitData;
pub use client::RefreshData;
pub use directory::Directory;
pub use directory::DirectoryBuilder;
pub use error::Error;
pub use error::ServerError;
pub use error::Subproblem;
pub use helpers::certificate_from_pem;
pub use helpers::certificate_to_pem;
pub use helpers::gen_rsa_private_key;
pub use helpers::private_key_from_pem;
pub use helpers::private_key_to_pem;
pub use helpers::Identifier;
pub use order::Order;
pub use order::OrderStatus;
