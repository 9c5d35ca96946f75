//! redb table definitions for the registry cache.
//!
//! Each table uses the entity id as `&str` key and the JSON-serialized
//! record as `&[u8]` value.

use redb::TableDefinition;

/// Server records keyed by `SERVER_ID`.
pub const SERVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("servers");

/// Resource records keyed by `RESOURCE_ID`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// User records keyed by `USER_ID`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
