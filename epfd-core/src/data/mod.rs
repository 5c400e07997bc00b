//! Source fetchers and the snapshot store.

pub mod entsoe;
pub mod http;
pub mod opsd;
pub mod provider;
pub mod smard;
pub mod snapshot;

pub use entsoe::{EntsoeFetcher, EntsoeSettings};
pub use http::build_client;
pub use opsd::{parse_opsd_csv, OpsdFetcher, OpsdSettings};
pub use provider::{DataError, FetchResult, FetchWindow, SourceFetcher};
pub use smard::{SmardFetcher, SmardSettings};
pub use snapshot::{SnapshotMeta, SnapshotStore, SnapshotWrite};
