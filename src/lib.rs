//! Check text against reference text specifications.
//!
//! The simplest reference text is the verbatim expected text with each line
//! prefixed by the reference-line tag, e.g. `"> "`; it matches exactly that
//! text. More interesting references mark parts of a line that need not
//! match verbatim. Such parts are called *masks*. Masks are not embedded in
//! the reference text itself (that would require escaping arbitrary
//! content) but declared on *argument lines* positioned under the text:
//!
//! ```text
//! > This is some reference text content
//!  .        xxxx
//! ```
//!
//! The argument line starts with `' '`; its second column selects the mask
//! kind (here `.`, a fixed-width mask) and each run of identical runes
//! under the text declares one mask. The subject line
//! `This is blue reference text content` matches this reference perfectly.
//! Argument lines stack and apply in order, so two masks can be declared on
//! one line or on two.
//!
//! For text such as log files, marking every timestamp would be tedious.
//! A *global* mask line (tag `*`) declares masks for every following
//! reference line instead:
//!
//! ```text
//! *.ttt tt tt tt tt ttt
//! > Jun 27 21:58:11.112 INFO  [thread1] create `l10n` dir
//! > Jun 27 21:58:11.113 INFO  [thread2] load state
//! ```
//!
//! When independent writers interleave (the log lines above come from two
//! threads) the relative order of their lines is not reproducible. Each
//! writer can be given its own *interleaving group*, declared in the
//! preamble and named by the rune in column 1 of its reference lines:
//!
//! ```text
//! %%12
//! *.ttt tt tt tt tt ttt
//! >1Jun 27 21:58:11.112 INFO  [thread1] create `l10n` dir
//! >2Jun 27 21:58:11.113 INFO  [thread2] load state
//! >1Jun 27 21:58:11.125 DEBUG [thread1] clearing maps
//! ```
//!
//! Within one group the reference order is binding; across groups any
//! interleaving is accepted. Each subject line is matched against the
//! oldest pending line of every group, in the declared group order; the
//! first group whose candidate accepts the line wins.
//!
//! # Example
//!
//! ```
//! use texst::{RefReader, Texst};
//!
//! let reference = "\
//! > This is some reference text content
//!  .        xxxx";
//! let mut reference = RefReader::from_str("example", reference)?;
//! let outcome = Texst::default().check(
//!     &mut reference,
//!     "This is blue reference text content".as_bytes(),
//!     &mut (),
//! )?;
//! assert!(outcome.passed());
//! # Ok::<(), texst::Error>(())
//! ```

pub mod core;
pub mod prepare;
pub mod testing;

pub use crate::core::{
    Control, Error, Mask, MaskKind, Outcome, RefError, RefLine, RefReader, Reason, Sink, SubjError,
    Texst,
};
pub use crate::prepare::Prepare;

// Line tags
// =========

/// Marks a comment line; stripped anywhere in a reference document.
pub const TAG_COMMENT: char = '#';
/// First rune of preamble lines; `%%…` declares the interleaving groups.
pub const TAG_PREAMBLE: char = '%';
/// Marks a global mask line applying to all subsequent reference lines.
pub const TAG_GLOBAL_ARG: char = '*';
/// Marks a reference line; column 1 names its interleaving group.
pub const TAG_REF_LINE: char = '>';
/// Marks an argument line attached to the most recent reference line.
pub const TAG_LINE_ARG: char = ' ';
