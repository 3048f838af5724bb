//! # lux_relay
//!
//! An async Rust library for discovering gateway-bridged smart bulbs and
//! driving them by name.
//!
//! This crate provides a **runtime-agnostic** engine that sits between a bulb
//! protocol client and whatever triggers commands (an automation host, a CLI,
//! a UI). It keeps a registry of discovered gateways and bulbs, resolves
//! human-assigned bulb names while discovery is still in progress, and applies
//! power and color commands with per-device failure isolation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use lux_relay::{Color, Config, Service};
//!
//! // `transport` is any `lux_relay::Transport` implementation, usually
//! // provided by a protocol crate.
//! async fn blink_kitchen(transport: MyTransport) -> Result<(), lux_relay::Error> {
//!     let service = Service::new(transport, Config::default());
//!     service.start().await?;
//!
//!     let outcome = service.pulse(&["Kitchen", "Hall"], Color::RED, None).await?;
//!     println!("{outcome}");
//!
//!     service.stop().await
//! }
//! ```
//!
//! ## Features
//!
//! - **Runtime Agnostic**: Works with tokio, async-std, or smol async runtimes
//! - **Discovery Windows**: Bounded listening periods driven by a timer, see [`DiscoverySession`]
//! - **Name Resolution**: Bounded retries while discovery catches up, see [`Resolver`]
//! - **Best-Effort Commands**: One failing bulb never blocks its peers, see [`Outcome`]
//! - **Pulses**: Temporary colors that are always restored, see [`Service::pulse`]
//! - **Requests**: Validate host requests by action id with [`Request`] and [`ActionKind`]
//! - **Notifications**: Registry-changed callbacks via [`Service::subscribe`]
//! - **Diagnostics**: Known devices and command history via [`Service::diagnostics`]
//!
//! ## Devices
//!
//! The engine never speaks a wire protocol. Gateways and bulbs are reached
//! through the [`Gateway`] and [`Bulb`] traits, and the discovery listener
//! through [`Transport`]. Every device call is bounded by
//! [`Config::device_timeout`].
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! lux-relay = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! lux-relay = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! lux-relay = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod action;
mod config;
mod device;
mod discovery;
mod dispatch;
mod errors;
mod history;
mod observer;
mod outcome;
mod registry;
mod resolver;
pub mod runtime;
mod service;
#[cfg(test)]
mod testing;
mod transport;
mod types;

// Re-export public API
pub use action::{Action, ActionKind, Request};
pub use config::Config;
pub use device::{Bulb, BulbInfo, BulbRef, Gateway, GatewayRef};
pub use discovery::DiscoverySession;
pub use dispatch::CommandDispatcher;
pub use errors::Error;
pub use history::{CommandHistory, HistoryEntry, HistorySummary};
pub use observer::{Observers, RegistryCallback, RegistryEvent};
pub use outcome::{Failure, Outcome};
pub use registry::{Lookup, Registry, Snapshot};
pub use resolver::{Resolution, Resolver};
pub use service::Service;
pub use transport::{DiscoveryEvent, DiscoverySink, Transport};
pub use types::{Color, PowerState};
