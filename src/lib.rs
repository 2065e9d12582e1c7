#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations, missing_docs, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod common;
pub use common::{AdapterError, Message, StoreError, Timestamp, WatcherError};

/// Chain identifiers and message identities.
pub mod primitives;
pub use primitives::{
    key::{compare_keys, MessageKey},
    Chain,
};

/// Core bridge contract bindings and addresses.
pub mod bindings;

/// Process configuration.
pub mod config;
pub use config::{BackendConfig, RemoteConfig, WatcherConfig};

/// Per-chain access to finalized watermarks and bridge messages.
pub mod adapter;
pub use adapter::ChainAdapter;

/// Storage backends.
pub mod store;
pub use store::Store;

mod watcher;
pub use watcher::{ChainState, Cursor, CycleFailure, CycleOutcome, Watcher};

mod orchestrator;
pub use orchestrator::Orchestrator;
