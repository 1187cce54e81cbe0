//! Applies RFC-6902-style patches (add/replace/remove subset) to a virtual
//! document assembled from a Hardware plus its availability windows, then
//! diffs the result back into store mutations.

mod apply;

pub use apply::{apply_patch, assemble_document, PatchOp, PatchOpKind, PatchOutcome, WindowChanges};
