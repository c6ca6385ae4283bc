//! Shared engine for the switchboard: the hostname registry, the
//! control-plane IPC server, the reverse proxy, and the ownership
//! arbitration that decides which one a process runs.

pub mod arbitration;
pub mod backoff;
pub mod config;
pub mod control;
pub mod error;
pub mod framing;
pub mod paths;
pub mod proxy;
pub mod registry;
pub mod tls;
pub mod wire;

pub use arbitration::{arbitrate, Arbitration};
pub use config::Config;
pub use control::ControlServer;
pub use error::{Result, SwitchboardError};
pub use proxy::ProxyServer;
pub use registry::{ConnectionId, ControlChannel, InsertOutcome, RegisteredApp, RegistryTable};
