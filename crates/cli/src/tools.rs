//! Well-known Semem tool names and resource URIs.
//!
//! These are shorthand for the REPL and batch runner only; the catalog
//! itself is always discovered from the server at connect time.

pub const STORE: &str = "semem_store_interaction";
pub const EMBED: &str = "semem_generate_embedding";
pub const CONCEPTS: &str = "semem_extract_concepts";
pub const SEARCH: &str = "semem_retrieve_memories";

pub const STATUS_URI: &str = "semem://status";
