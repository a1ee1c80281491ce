//! Stable exit codes for engine-hooks CLI commands.

/// Command succeeded (including stages skipped for lack of a script).
pub const OK: i32 = 0;
/// An engine script or a directory mirror failed.
pub const STAGE_FAILED: i32 = 1;
/// Invalid config, payload or registry, or the engine payload could not be built.
pub const INVALID: i32 = 2;
