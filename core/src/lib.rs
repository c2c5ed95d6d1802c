//! Deduplicating, offline-aware API client core.
//!
//! # Overview
//! A `Coordinator` turns logical calls (`RequestModel` + HTTP verb) into HTTP
//! exchanges. Identical calls issued while one is in flight share that single
//! exchange. When the `ConnectivityGate` reports no connectivity, calls that
//! asked for persistence are served from the `CacheStore`, optionally
//! encrypted at rest.
//!
//! # Design
//! - Every collaborator is constructed explicitly and injected through
//!   `CoordinatorBuilder`; there is no global state.
//! - HTTP is behind the `Transport` trait. `ReqwestTransport` (feature
//!   `reqwest`, on by default) is the production implementation.
//! - Outcomes are raw `Payload`s, fanned out from one designated completion
//!   thread and decoded per waiter.
//! - The host pushes reachability into the gate; nothing here polls the
//!   network on its own.

pub mod cache;
pub mod cipher;
pub mod codec;
mod completion;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod params;
pub mod registry;
pub mod request;
#[cfg(feature = "reqwest")]
pub mod reqwest_transport;
pub mod transfer;
pub mod types;

pub use cache::CacheStore;
pub use cipher::{ChaChaCipher, Cipher};
pub use completion::COMPLETION_THREAD_NAME;
pub use config::{CacheConfig, ClientConfig};
pub use connectivity::{ConnectivityGate, NetworkStatus, Subscription};
pub use coordinator::{ChangeEvent, Coordinator, CoordinatorBuilder, Pending, Route, Ticket};
pub use error::{ApiError, CacheError, CipherError, ConfigError, TransportError};
pub use fingerprint::Fingerprint;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use params::{ParamValue, Params};
pub use request::RequestModel;
#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;
pub use transfer::FileUpload;
pub use types::{Payload, PayloadSource, Persistence, Resource};
