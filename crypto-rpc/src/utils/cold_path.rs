/// Hints to the optimizer that the calling branch is rarely taken.
#[cold]
#[inline(always)]
pub(crate) fn cold_path() {}
