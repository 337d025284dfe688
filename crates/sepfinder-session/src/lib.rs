//! Device and firmware selection sessions.
//!
//! A session walks a user from a device family to a signed firmware, resolves
//! the firmware's build manifest for the chosen board and finally bundles the
//! SEP and baseband files pulled out of the remote firmware archive.
//!
//! # Architecture
//!
//! - `state`: the [`SelectionState`] sum type, one variant per step
//! - `session`: [`SelectionSession`], the transition function
//! - `version`: ordering of firmware version labels
//! - `store`: [`SessionStore`], per-session locking and lifecycle
//! - `dispatch`: [`Dispatcher`], restart-aware routing of user input
//! - `bundle`: output bundle assembly
//!
//! # Example
//!
//! ```no_run
//! use sepfinder_protocol::{ClientConfig, HttpRangeFetcher, IpswCatalog, ManifestSource};
//! use sepfinder_session::{Dispatcher, SelectionSession, SessionConfig, SessionId, SessionStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env();
//!     let fetcher = Arc::new(HttpRangeFetcher::new(&config)?);
//!     let session = SelectionSession::new(
//!         Arc::new(IpswCatalog::new(&config)?),
//!         ManifestSource::new(fetcher, &config),
//!     );
//!     let store = Arc::new(SessionStore::new(SessionConfig::from_env().session_ttl));
//!     let dispatcher = Dispatcher::new(store, session);
//!
//!     let id = SessionId::from("demo");
//!     for input in ["/start", "iPhone", "iPhone 13", "16.5"] {
//!         for reply in dispatcher.handle_text(&id, input).await {
//!             println!("{}", reply.text);
//!         }
//!     }
//!     let outcome = dispatcher.handle_download(&id).await?;
//!     std::fs::write(&outcome.bundle.file_name, &outcome.bundle.data)?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod reply;
pub mod session;
pub mod state;
pub mod store;
pub mod version;

pub use bundle::{Bundle, DownloadOutcome};
pub use config::{ConsoleArgs, SessionConfig};
pub use dispatch::Dispatcher;
pub use error::{BundleError, Result, SessionError, SessionStateError};
pub use reply::{Keyboard, Reply};
pub use session::{Command, SelectionSession, Transition};
pub use state::{DeviceType, FirmwareMenu, ResolvedBuild, SelectionState};
pub use store::{SessionId, SessionSlot, SessionStore};
pub use version::FirmwareVersion;
