//! # netsync_replication
//!
//! The replication engine: a server that owns entities and a client that
//! mirrors them, both driven by a single `update(now)` call per tick.
//!
//! This crate provides:
//!
//! - [`NetworkServer`] — spawn/destroy, observers, authority, players and
//!   per-tick delta broadcast.
//! - [`NetworkClient`] — spawn resolution, state application, remote calls
//!   and round-trip measurement.
//! - [`ReplicationContext`] — the id → entity table each peer owns.
//! - [`RemoteCalls`] — hash-keyed command, RPC and sync event handlers.
//! - [`TemplateRegistry`] and [`Templates`] — asset and scene resolution.
//! - [`ReplicationConfig`] — tunables, loadable from JSON.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod observers;
pub mod rpc;
pub mod server;
pub mod templates;

pub use client::{ClientState, NetworkClient, RoundTrip};
pub use config::{DEFAULT_LISTEN_ADDRESS, ReplicationConfig};
pub use context::ReplicationContext;
pub use error::{CallError, ConfigError, ReplicationError};
pub use observers::{ObserverDiff, compute_observers, diff_observers};
pub use rpc::{CallContext, CallKind, RemoteCalls};
pub use server::NetworkServer;
pub use templates::{TemplateRegistry, Templates};
