//! # voltage_outstation
//!
//! IEC 60870-5-104 outstation (slave) for Rust.
//!
//! The crate lets a substation or RTU report measurements to SCADA masters
//! and accept commands from them over TCP.
//!
//! ## Features
//!
//! - **Multi-master**: every connected master gets its own session task
//! - **Bounded queues**: periodic telemetry never blocks; the oldest queued
//!   ASDU is evicted when a session's queue is full
//! - **Pluggable behavior**: system commands and process commands are routed
//!   to a [`StationHandler`]
//! - **Type Safe**: Strong typing for TypeID, COT, IOA and every supported
//!   information object
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_outstation::{ProcessHandler, Station, StationConfig};
//!
//! #[tokio::main]
//! async fn main() -> voltage_outstation::Result<()> {
//!     let config = StationConfig::new("0.0.0.0:2404");
//!     let mut station = Station::new(config, Arc::new(ProcessHandler::default()));
//!
//!     let addr = station.start().await?;
//!     println!("Listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     station.stop().await
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 uses TCP/IP for communication (default port 2404).
//! The protocol defines three frame types:
//!
//! - **I-frame**: Information transfer (contains ASDU)
//! - **S-frame**: Supervisory (acknowledgment)
//! - **U-frame**: Unnumbered (control: STARTDT, STOPDT, TESTFR)
//!
//! ### ASDU Structure
//!
//! ```text
//! +---------+-----+-----+------------+----------------+-----------------+
//! | Type ID | VSQ | COT | Originator | Common Address | Objects ...     |
//! | 1 byte  | 1   | 1   | 1          | 2 (LE)         | IOA 3 (LE) + el |
//! +---------+-----+-----+------------+----------------+-----------------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod macros;

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod parser;
pub mod process;
pub mod queue;
pub mod session;
pub mod station;
pub mod transport;
pub mod types;

// Re-export main types
pub use codec::{Apdu, Iec104Codec};
pub use config::StationConfig;
pub use dispatcher::{Dispatcher, Handlers, Responder, StationHandler};
pub use error::{Iec104Error, Result};
pub use parser::parse_asdu;
pub use process::{ProcessHandler, ProcessImage};
pub use queue::{OutboundQueue, QueuedAsdu};
pub use session::{
    channel_connection, ChannelConnection, ChannelPeer, Connection, LinkEvent, Session,
    SessionRegistry,
};
pub use station::{PeriodicReporter, Station};
pub use transport::{ApciConnection, TcpConnection};
pub use types::*;
