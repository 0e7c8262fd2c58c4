#![expect(
    clippy::single_char_add_str,
    clippy::manual_is_multiple_of,
    clippy::manual_div_ceil
)]

//! A daemon and client library for isolating secret material and cryptographic
//! operations in a dedicated server process.
//!
//! # Example
//!
//! A minimal client speaking to a locally running daemon:
//!
//! ```no_run
//! use crypto_rpc::proxy::Connection;
//! use std::os::unix::net::UnixStream;
//!
//! let socket = UnixStream::connect("/run/crypto-rpc.sock").unwrap();
//! let conn = Connection::new(socket.into());
//! let key_storage_id = conn.alloc_id();
//! conn.handshake_key_storage(key_storage_id).unwrap();
//! ```
//!
//! A daemon embedding the runtime directly (the `crypto-rpc-daemon` binary does this
//! around a parsed configuration file and a `clap`-derived CLI):
//!
//! ```no_run
//! use crypto_rpc::endpoint::SharedProviders;
//! use crypto_rpc::keystore::KeyStorageProvider;
//! use crypto_rpc::keystore::access_control::AccessControlConfig;
//! use crypto_rpc::keystore::journal::InMemoryKeyJournal;
//! use crypto_rpc::keystore::security_event::NoopSecurityEventReporter;
//! use crypto_rpc::server::ServerRuntime;
//! use std::rc::Rc;
//!
//! struct NoCryptoProviders;
//!
//! impl crypto_rpc::providers::CryptoProviderFactory for NoCryptoProviders {
//!     fn resolve(&self, _provider_uuid: u128) -> Option<Rc<dyn crypto_rpc::providers::CryptoProvider>> {
//!         None
//!     }
//! }
//!
//! let key_storage = KeyStorageProvider::new(
//!     Vec::new(),
//!     AccessControlConfig::default(),
//!     Box::new(NoopSecurityEventReporter),
//!     Box::new(InMemoryKeyJournal),
//! );
//! let providers = Rc::new(SharedProviders {
//!     key_storage,
//!     crypto_providers: Rc::new(NoCryptoProviders),
//!     x509_provider: None,
//!     x509_ca_connector_id: None,
//!     x509_trustmaster_id: None,
//! });
//! let server = ServerRuntime::new("/run/crypto-rpc.sock", 64, providers).unwrap();
//! server.run();
//! ```
//!
//! # Proxies and skeletons
//!
//! Every object a client can address has two halves: a client-side [`proxy::ProxyBase`]
//! (embedded in a generated proxy type) and a server-side [`skeleton::Skeleton`]
//! implementation registered in a [`skeleton::SkeletonRegistry`]. Both sides agree only
//! on a [`envelope::ProxyId`] — the proxy never sees the implementation directly, and the
//! skeleton never sees the client's local representation.
//!
//! # The key storage provider
//!
//! [`keystore::KeyStorageProvider`] is the one built-in provider this crate ships a
//! complete implementation of: a fixed table of slots (content mutable, identity and
//! count fixed at construction), at-most-one-owner access via
//! [`keystore::trusted_container::TrustedContainer`], scoped multi-slot transactions, and
//! an access-control matrix consulted on every restricted operation. The cryptographic
//! primitives a provider actually performs and the X.509 verification engine are
//! deliberately out of scope; [`providers::CryptoProviderFactory`] and
//! [`providers::X509Provider`] are the seams a daemon wires a real implementation into.
//!
//! # Logging
//!
//! This crate logs through the `log` facade; the `crypto-rpc-daemon` binary installs an
//! `env_logger` subscriber whose verbosity is controlled by repeating `-v` or by
//! `RUST_LOG`. Security-relevant denials are additionally reported through
//! [`keystore::security_event::SecurityEventReporter`], independent of the logging level.

pub mod acceptor;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod object;
mod poll;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod skeleton;
#[cfg(test)]
mod test_framework;
mod trans;
mod utils;
mod wire;
