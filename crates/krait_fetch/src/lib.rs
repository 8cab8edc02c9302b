#![deny(missing_docs)]

//! The download engine of krait.
//!
//! Downloads are expressed as requests against a list of equivalent
//! [`Mirror`]s. The [`Downloader`] drives many requests concurrently under a
//! global parallelism cap, while every mirror performs its own admission
//! control, failure accounting and retry backoff. Transfers are verified
//! against their expected checksum while they stream to disk.

mod download;
mod mirror;

pub use download::{Checksum, DownloadError, DownloadRequest, DownloadResult, Downloader};
pub use mirror::{FileMirror, HttpMirror, Mirror, MirrorStats, RequestShape};
