use fail::fail_point;

use crate::bail;
use crate::error::{DumpResult, ErrorKind};

/// Evaluated after the relational commit and before any counter data is deleted.
pub const PROCESS__BEFORE_SOURCE_DELETE: &str = "process.before_source_delete";

/// Evaluated after the counter transaction is built and before it is committed.
pub const PROCESS__BEFORE_SOURCE_COMMIT: &str = "process.before_source_commit";

/// Returns an error when the named failpoint is configured to `return`.
pub fn dump_fail_point(name: &str) -> DumpResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        bail!(
            ErrorKind::FailpointTriggered,
            "An error occurred in a fail point",
            detail
        );
    });

    Ok(())
}
