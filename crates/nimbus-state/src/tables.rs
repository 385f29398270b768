//! redb table definitions for the Nimbus state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Instance records keyed by instance id (`i-…`).
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Launch templates keyed by template id (`lt-…`).
pub const LAUNCH_TEMPLATES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("launch_templates");
