//! Definition compiler runtime.
//!
//! Drives `defc_core` end to end: loads definition sources through injected
//! ports, compiles them per container on a bounded worker pool and decides
//! (and optionally writes) their revisions.
//!
//! ```text
//! SourceProvider → FetchPipeline → grouping → CompileUnit (per container) → PersistStep
//!                        │
//!                        └── labels / filters → BackgroundTasks → AuxiliaryStore
//! ```

pub mod adapters;
pub mod background;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;

pub use background::BackgroundTasks;
pub use compiler::{
    CompileOutcome, CompileReport, CompileStage, CompiledEntry, DefinitionCompiler,
};
pub use config::{CompilerConfig, ConfigLoader, TenantPolicy};
pub use context::{CompilerContext, RunGuard};
pub use error::{CompileError, FetchError};
pub use fetch::{FetchPipeline, FetchResult};

pub use defc_core;
