//! Filesystem-backed notebook vault.
//!
//! Markdown notes with structured frontmatter, written atomically into a
//! configured root. Per-day log files follow the
//! `Log_Global_YYYY-MM-DD.md` convention.

mod frontmatter;
mod writer;

pub use frontmatter::{format as format_frontmatter, split_document, Frontmatter};
pub use writer::{NoteInfo, NotebookVault, SortOrder};
