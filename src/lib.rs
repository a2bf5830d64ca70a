pub mod backend;
pub mod cf;
pub mod error;
pub mod index;
pub mod indexing;
pub mod locks;
pub mod metadata;
pub mod store;

// Re-export commonly used types for tests
pub use backend::{
    open_dataset, open_dataset_with_backend, register_backend, BackendEntrypoint,
    GribBackendEntrypoint, OpenOptions,
};
pub use error::{Error, Result};
pub use indexing::{ArrayData, BackendArray, DType, Indexer, LazilyIndexedArray};
pub use locks::{default_lock, StoreLock};
pub use metadata::{AttributeValue, Attributes, Dataset, Variable, VariableData};
pub use store::{EncodeCf, GribDataStore, StoreConfig};
