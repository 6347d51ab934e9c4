mod versioned_store;

pub use versioned_store::ModelError;
pub use versioned_store::VersionedStore;
