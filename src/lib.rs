//! Local file registry and pickup-code file exchange.
//!
//! Imported files are copied into an app-private [`store`] and recorded in a
//! JSON [`registry`]. The [`workflow`] publishes files to an exchange service
//! in return for a 4-digit [`code`], and retrieves files by such a code.

pub mod code;
pub mod config;
pub mod error;
pub mod gateway;
pub mod record;
pub mod registry;
pub mod remote;
pub mod server;
pub mod store;
pub mod workflow;

pub use code::PickupCode;
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{OpenStrategy, OpenTarget, SharingGateway};
pub use record::{FileKind, FileRecord, FileRef, RecordStatus};
pub use registry::{Registry, RegistryEvent, Watcher};
pub use remote::{Deleted, ExchangeClient, FetchOutcome};
pub use store::{LocalFileStore, StoredBlob};
pub use workflow::{CodeInput, PublishItem, PublishOutcome, PublishedCode, Retrieved, Workflow};
