//! User profiles, facts, aliases, relationships and conversation memory

pub mod aliases;
pub mod facts;
pub mod gender;
pub mod generator;
pub mod memory;
pub mod relationships;

pub use aliases::AliasService;
pub use facts::{FactExtractor, FactService, UserFact};
pub use generator::ProfileGenerator;
pub use memory::MemoryService;
pub use relationships::{RelationshipRow, RelationshipService};
