//! Identifier generation.

use uuid::Uuid;

/// Create a unique identifier with a readable prefix, e.g. `run_7f0c...`.
pub fn create_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}
