//! Utilities Module - shared infrastructure
//!
//! Contains helper functions used across the codebase:
//! - `path`: read/write/delete into a `serde_json::Value` tree by binding segments
//! - `value`: loose value semantics (truthiness, number coercion, equality, display)

pub mod path;
pub mod value;

// Re-export public helpers
pub use path::{add_last, delete_in, get_in, set_in};
pub use value::{
    deep_equal, is_truthy, loose_eq, number_value, strict_eq, to_display_string, to_number,
    type_of,
};
