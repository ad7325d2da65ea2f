//! The `RowWriter` seam implemented by all backend writers.

use crate::OutputResult;

/// A sink for one row type.
///
/// `finish` is idempotent; writers flush and close their file handles there
/// rather than in `Drop` so failures surface as errors.
pub trait RowWriter<R> {
    fn write(&mut self, row: &R) -> OutputResult<()>;

    fn finish(&mut self) -> OutputResult<()>;
}
