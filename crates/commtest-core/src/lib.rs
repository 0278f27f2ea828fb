//! # CommTest Core Library
//!
//! Link tester for serial and TCP channels.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Length-prefixed, CRC-32 checked frame codec
//! - Serial and TCP server transports behind one [`transport::Transport`] trait
//! - Per-channel timeout model
//! - The echo test sequencer, ramping the payload from 1 to 400 bytes
//! - A simulated device for running the whole test offline
//!
//! ## Example
//!
//! ```rust,ignore
//! use commtest_core::prelude::*;
//!
//! let config = AppConfig::from_file("commtest.json")?;
//! let mut engine = Engine::new(config.test, ());
//! engine.activate(open_transport(&config.link.unwrap())?);
//! engine.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
//! ```

pub mod config;
pub mod demo;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AppConfig, LinkConfig, NetworkConfig, SerialConfig, TestConfig};
    pub use crate::demo::{DemoConfig, DemoDevice, DemoFault};
    pub use crate::engine::Engine;
    pub use crate::protocol::{unwrap, wrap, FrameError};
    pub use crate::session::{Counters, Outcome, SessionObserver, SessionReport, Step};
    pub use crate::transport::{open_transport, ChannelKind, Transport, TransportError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
