//! # isi-client
//!
//! Client-side engine for the ISI sub-block modem protocol.
//!
//! Drivers talk to modem resources (supplementary services, phone info)
//! through request/response exchanges correlated by a one-byte
//! transaction id, over any PhoNet-framed byte stream.
//!
//! ## Architecture
//!
//! - **Protocol**: PhoNet framing, sub-block parsing, bounds-checked field access
//! - **Transport**: framed stream and in-memory transports
//! - **Client**: per-resource correlation, timeouts, reachability checks
//! - **Drivers**: call barring and device information, registered with
//!   the host once their resource answers
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use isi_client::{CallBarring, FeatureRegistry, IsiModem};
//!
//! #[tokio::main]
//! async fn main() -> isi_client::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:6000").await?;
//!     let modem = IsiModem::builder().connect(stream)?;
//!     let host = Arc::new(FeatureRegistry::new());
//!
//!     let barring = CallBarring::probe(&modem, host);
//!     barring.bring_up().settled().await;
//!
//!     let mask = barring.query("AO", 7).await?;
//!     println!("barred services: {:#04x}", mask);
//!     Ok(())
//! }
//! ```

pub mod bringup;
pub mod client;
pub mod config;
pub mod drivers;
pub mod error;
pub mod host;
pub mod protocol;
pub mod transport;

pub use bringup::{BringUp, BringUpState};
pub use client::{Exchange, IsiClient, IsiModem, IsiVersion, ModemBuilder, Reachability};
pub use config::ModemConfig;
pub use drivers::{CallBarring, DeviceInfo, InfoQuery};
pub use error::{ErrorKind, IsiError, Result};
pub use host::{Feature, FeatureRegistry, HostCore, HostJob};
