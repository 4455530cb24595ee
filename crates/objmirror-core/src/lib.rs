//! objmirror core
//!
//! The rule engine, storage facade and mirroring executor. An object appears
//! in a source location, the [`matcher`] selects the applicable rules, and
//! the [`transfer::MirrorService`] copies (and optionally transforms) the
//! payload to each destination, publishing notifications and recording the
//! outcome on a [`response::Response`].
//!
//! The periodic-scan coordinator that drives this engine from listings
//! rather than events lives in the `objmirror-cron` crate.

pub mod codec;
pub mod config;
pub mod event;
pub mod matcher;
pub mod notify;
pub mod response;
pub mod secret;
pub mod split;
pub mod storage;
pub mod template;
pub mod transfer;

pub use config::{Config, Rule};
pub use response::{Request, Response};
pub use transfer::MirrorService;
