//! Port implementations: filesystem sources, in-memory dictionary and
//! stores, structural schema check and the standard callback.

pub mod callback;
pub mod fs;
pub mod memory;
pub mod schema;

pub use callback::StandardCallback;
pub use fs::{FsContent, FsSourceProvider};
pub use memory::{InMemoryDictionary, InMemorySources, InMemoryStore, STANDARD_TYPES};
pub use schema::StructuralSchemaValidator;
