//! mtp-host — a host-side Media Transfer Protocol (MTP) engine.
//!
//! Talks PTP-over-USB-bulk to MTP devices (phones, cameras) without a kernel
//! driver: claims the device's MTP interface directly, runs the PTP request/
//! response/data state machine, and layers a per-device quirk database,
//! learned-profile tuning, and a durable transfer journal on top so reads and
//! writes survive the idiosyncrasies real devices have.
//!
//! # Layout
//!
//! - [`wire`] — PTP container framing and dataset codecs (no I/O).
//! - [`transport`] — the USB bulk/interrupt seam; [`transport::nusb_transport`]
//!   in production, [`transport::mock`] in tests.
//! - [`link`] — [`link::PtpLink`], the per-transaction request/response/data
//!   state machine, plus the async [`link::events::EventPump`].
//! - [`quirks`] and [`profile`] — the device-specific override database and
//!   the learned-tuning store that, together with [`config::EnvOverrides`],
//!   feed the five-layer merge in [`quirks::policy`].
//! - [`session`] — [`session::DeviceSession`], the actor-backed handle
//!   callers actually drive; owns the open sequence, enumeration, and the
//!   write recovery ladder.
//! - [`transfer`] and [`journal`] — the read/write primitives and the durable
//!   record of in-flight transfers session actors consult on reopen.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mtp_host::config::EnvOverrides;
//! use mtp_host::journal::{default_journal_root, JsonFileJournal, SharedJournal};
//! use mtp_host::profile::LearnedProfileStore;
//! use mtp_host::quirks::QuirkDatabase;
//! use mtp_host::session::{open_session, DeviceSession, SessionConfig};
//! use mtp_host::transport::nusb_transport::NusbOpener;
//! use mtp_host::types::DeviceSummary;
//!
//! # async fn run(summary: DeviceSummary) -> mtp_host::error::MtpResult<()> {
//! let journal: SharedJournal = Arc::new(JsonFileJournal::new(default_journal_root()?));
//! let config = SessionConfig {
//!     opener: Arc::new(NusbOpener),
//!     journal: journal.clone(),
//!     profile_store: Arc::new(LearnedProfileStore::default_location()?),
//!     quirk_db: QuirkDatabase::empty(),
//!     overrides: EnvOverrides::from_env(),
//! };
//!
//! let opened = open_session(&config, &summary).await?;
//! let session = DeviceSession::spawn(opened, journal, config.profile_store.clone());
//! let storages = session.storages().await?;
//! println!("{} storages visible", storages.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod journal;
pub mod link;
pub mod profile;
pub mod quirks;
pub mod session;
pub mod target_ladder;
pub mod transfer;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{MtpError, MtpResult};
pub use session::{DeviceSession, OpenedSession, SessionConfig, WriteRequest};
pub use types::{DeviceInfo, DeviceSummary, ObjectEntry, Progress, StorageInfo};
