//! Asset catalog, source and ingestion.
//!
//! This crate provides:
//! - The [`AssetCatalog`] and [`AssetIngestor`] collaborator traits
//! - [`LocalCatalog`], a directory of clips indexed by a JSON manifest
//! - [`MemoryCatalog`] for tests and ephemeral runs
//!
//! Both catalogs also implement [`vcomp_media::AssetSource`] so the renderer
//! can resolve asset ids to local files.

pub mod catalog;
pub mod error;
pub mod local;
pub mod memory;

pub use catalog::{AssetCatalog, AssetIngestor, IngestRequest, TAG_COMPOSITION};
pub use error::{StorageError, StorageResult};
pub use local::{LocalCatalog, MANIFEST_FILE, MEDIA_DIR};
pub use memory::MemoryCatalog;
