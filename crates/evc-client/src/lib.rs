//! The coordination layer of the evcache-rs client.
//!
//! [`CacheClient`] turns each call into one or more operations, submits
//! them through a [`Transport`](evc_transport::Transport) to the nodes a
//! [`NodeLocator`](evc_transport::NodeLocator) picks, and hands back a
//! completion primitive from `evc-ops` that the transport's callbacks settle.
//!
//! # Modules
//!
//! - [`client`] -- entry points: reads, bulk reads, writes, replicated writes,
//!   append-or-add and counters
//! - [`append_or_add`] -- the three-phase append/add/append fallback
//! - [`mutate`] -- blocking counter mutation results
//! - [`telemetry`] -- metric sinks and the per-client metric names
//! - [`config`] -- TOML configuration

pub mod append_or_add;
mod callbacks;
pub mod client;
pub mod config;
pub mod error;
pub mod mutate;
pub mod telemetry;

pub use append_or_add::AppendOrAddPhase;
pub use client::CacheClient;
pub use config::{ClientConfig, ClusterConfig, Settings};
pub use error::{ClientError, ClientResult};
pub use mutate::{MutationOutcome, MutationResult};
pub use telemetry::{InMemoryTelemetry, Metrics, NoopTelemetry, Telemetry, TracingTelemetry};
