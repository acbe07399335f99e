//! Domain entities for the node mesh.
//!
//! Pure data and merge rules.  Nothing here performs I/O; the stores in the
//! node crate apply these rules when they persist records.
//!
//! # Merge policies
//!
//! | Entity       | Key  | Policy                                              |
//! |--------------|------|-----------------------------------------------------|
//! | `Node`       | `id` | last writer wins, ordered by `last_seen`            |
//! | `UserRecord` | `id` | first writer wins; immutable except for `last_seen` |

pub mod node;
pub mod user;
