//! Synchronous client over an event-driven chat engine.
//!
//! [`Client`] owns the delivery thread and the dispatch workers, correlates
//! replies with requests and drives the login handshake. The native engine is
//! reached only through the [`Engine`] trait.

mod auth;
mod client;
pub mod config;
mod delivery;
pub mod engine;
mod methods;
pub mod proxy;
pub mod simulator;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, Identity};
pub use engine::Engine;
pub use methods::HistoryWindow;
pub use proxy::{ProxyConfig, ProxyKind};
pub use simulator::{SimulatedAccount, SimulatedEngine};
pub use tdbridge_core::{
    AuthorizationState, ClientError, ClientErrorCategory, Command, PendingResult, UpdateHandler,
};
pub use tdbridge_platform::{ScriptedPrompt, SecretKind, SecretPrompt, StdinPrompt};
