//! WireGuard interface gateway
//!
//! This module wraps everything that reads or mutates the live interface:
//! key generation, `wg show dump` parsing, configuration file edits and
//! address allocation.

pub mod conf;
pub mod dump;
mod gateway;
mod keys;
mod memory;
mod peer;

pub use gateway::{client_hosts, lowest_free_host, InterfaceGateway, WgGateway, DEFAULT_LISTEN_PORT};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use memory::MemoryGateway;
pub use peer::{host_net, LivePeer, RawSample};

#[cfg(test)]
pub use gateway::MockInterfaceGateway;
