//! Distributed mutual exclusion for a single shared printer: N peers run
//! Ricart–Agrawala over Lamport logical clocks to serialize access to a
//! stateless printer service.
//!
//! Dependency order, leaves first: [`clock`] -> [`mutex`] -> [`transport`],
//! which owns the wire schema ([`wire`]) and the RPC server/stubs. [`config`]
//! and [`printer`]/[`generator`] are the ambient pieces wired around that
//! core.

pub mod clock;
pub mod config;
pub mod generator;
pub mod mutex;
pub mod printer;
pub mod transport;
pub mod wire;
