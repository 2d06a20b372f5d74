use std::path::{Path, PathBuf};
use std::sync::Arc;

use patch_engine::{apply_changes, parse_freeform, parse_unified_diff, verify_changes, PatchError};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApplyPatchArgs {
    patch: String,
}

/// Parses, verifies, and atomically applies a patch through the boundary.
pub fn apply_patch(
    boundary: &FsBoundary,
    patch: &str,
    freeform: bool,
) -> Result<Vec<patch_engine::PatchResult>, ToolError> {
    let changes = if freeform {
        parse_freeform(patch)
    } else {
        parse_unified_diff(patch)
    }
    .map_err(map_patch_error)?;

    let resolve = |path: &Path| -> Result<PathBuf, String> {
        boundary.resolve(path).map_err(|error| error.to_string())
    };
    let plan = verify_changes(&changes, &resolve).map_err(map_patch_error)?;
    apply_changes(plan).map_err(map_patch_error)
}

fn map_patch_error(error: PatchError) -> ToolError {
    match error {
        PatchError::Parse { .. } | PatchError::Verify { .. } => {
            ToolError::PatchVerification(error.to_string())
        }
        PatchError::Apply { .. } => ToolError::PatchApplyFailed(error.to_string()),
    }
}

fn registration(
    boundary: &Arc<FsBoundary>,
    name: &'static str,
    description: &'static str,
    patch_description: &'static str,
    freeform: bool,
) -> ToolRegistration {
    let boundary = Arc::clone(boundary);
    ToolRegistration::new(
        name,
        description,
        json!({
            "type": "object",
            "properties": {
                "patch": { "type": "string", "description": patch_description }
            },
            "required": ["patch"],
            "additionalProperties": false
        }),
        true,
        Box::new(move |args: Value| {
            let args: ApplyPatchArgs = parse_args(name, args)?;
            let results = apply_patch(&boundary, &args.patch, freeform)?;
            Ok(ToolOutcome::ok(json!(results)))
        }),
    )
}

pub(crate) fn registrations(boundary: &Arc<FsBoundary>) -> Vec<ToolRegistration> {
    vec![
        registration(
            boundary,
            "apply_patch_json",
            "Apply a unified diff atomically",
            "Unified diff text (---/+++ headers, @@ hunks).",
            false,
        ),
        registration(
            boundary,
            "apply_patch_freeform",
            "Apply a freeform patch envelope atomically",
            "Patch between '*** Begin Patch' and '*** End Patch' markers.",
            true,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::boundary::FsBoundary;
    use crate::error::ToolError;

    use super::apply_patch;

    #[test]
    fn freeform_patch_applies_inside_the_boundary() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "foo\n").expect("seed a.txt");
        let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary"));

        let patch = "*** Begin Patch\n*** Update File: a.txt\n@@\n-foo\n+bar\n*** End Patch";
        let results = apply_patch(&boundary, patch, true).expect("patch applies");

        assert_eq!(results.len(), 1);
        assert!(!results[0].created);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "bar\n"
        );
    }

    #[test]
    fn patch_targets_outside_the_boundary_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary"));

        let patch = "*** Begin Patch\n*** Add File: /etc/lincona-test.txt\n+nope\n*** End Patch";
        let error = apply_patch(&boundary, patch, true).expect_err("escape must fail");
        assert!(matches!(error, ToolError::PatchVerification(_)));
        assert!(error.to_string().contains("escapes the restricted root"));
    }

    #[test]
    fn unified_diffs_resolve_relative_to_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("code.txt"), "one\ntwo\n").expect("seed code.txt");
        let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary"));

        let patch = "--- a/code.txt\n+++ b/code.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+2\n";
        apply_patch(&boundary, patch, false).expect("patch applies");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("code.txt")).expect("read"),
            "one\n2\n"
        );
    }
}
