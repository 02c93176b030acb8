//! Definition compiler core.
//!
//! Pure domain model and algorithms for compiling hierarchical object-type
//! definitions: structural merge, two-axis dependency sort, normalization,
//! content hashing for revision decisions, and the port traits the runtime
//! crate injects implementations for. No async runtime, no I/O.

pub mod error;
pub mod merge;
pub mod messages;
pub mod model;
pub mod normalize;
pub mod ports;
pub mod revision;
pub mod sorter;
pub mod source;
pub mod type_parser;

pub use error::PortError;
pub use merge::{merge_lists, merge_lists_with, merge_template, Mergeable};
pub use messages::{codes, MessageLog, Severity, VerificationMessage};
pub use model::{
    definition_key, AllowedChild, ConditionDefinition, ControlDefinition, ControlParam,
    DataTypeDefinition, Definition, DefinitionKind, DisplayType, PropertyDefinition,
    RegionDefinition, StateTransition, TransitionDefinition,
};
pub use revision::{content_equal, content_hash, RevisionDecision};
pub use sorter::{sort_both_axes, sort_definitions, sort_definitions_after, SortAxis, UnresolvedReason};
pub use type_parser::{TypeDescriptor, TypeKind, TypeParseError};
