//! Patch parsing and atomic application for lincona's apply-patch tools.
//!
//! Two input envelopes are accepted:
//! - the freeform `*** Begin Patch` / `*** End Patch` envelope with explicit
//!   `Add File` / `Update File` / `Delete File` directives and `@@` hunks;
//! - conventional unified diffs (`--- a/x` / `+++ b/x`, `@@ -a,b +c,d @@`),
//!   where `/dev/null` headers signal file creation and deletion.
//!
//! Application is all-or-nothing: new contents are staged as tempfile
//! siblings and committed with renames only after every stage succeeds; any
//! mid-commit failure rolls completed renames and deletions back, so no file
//! on disk ever reflects part of a failed patch.

mod apply;
mod error;
mod parser;

pub use apply::{apply_changes, verify_changes, ApplyPlan, PatchResult};
pub use error::PatchError;
pub use parser::{parse_freeform, parse_unified_diff, Hunk, HunkLine, PatchChange, PatchOp};
