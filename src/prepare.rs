//! Writing verbatim reference documents from subject text.
//!
//! The produced reference accepts exactly the prepared subject: every line
//! is prefixed with the reference-line tag and its interleaving group. The
//! original terminator of each line (LF, CRLF, or none on a final unended
//! line) is written back unchanged, so preparing and then checking the same
//! bytes round-trips for any line-ending style.

use std::io::{self, BufRead, Write};

use crate::{TAG_PREAMBLE, TAG_REF_LINE};

/// Emits a verbatim reference document for a subject stream.
#[derive(Clone, Copy, Debug)]
pub struct Prepare {
    /// Interleaving group to place all reference lines in.
    pub igroup: char,
}

impl Default for Prepare {
    fn default() -> Self {
        Self { igroup: ' ' }
    }
}

impl Prepare {
    /// Copy `subject` to `reference` as a reference document. A non-default
    /// interleaving group is declared with a `%%` preamble line first.
    pub fn text<R, W>(&self, mut subject: R, reference: &mut W) -> io::Result<()>
    where
        R: BufRead,
        W: Write,
    {
        if self.igroup != ' ' {
            writeln!(
                reference,
                "{}{}{}",
                TAG_PREAMBLE, TAG_PREAMBLE, self.igroup
            )?;
        }
        let mut prefix = String::new();
        prefix.push(TAG_REF_LINE);
        prefix.push(self.igroup);

        let mut buf = Vec::new();
        loop {
            buf.clear();
            if subject.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let (content, terminator) = split_terminator(&buf);
            reference.write_all(prefix.as_bytes())?;
            reference.write_all(content)?;
            reference.write_all(terminator)?;
        }
    }
}

/// Split a raw line chunk into its content and terminator bytes.
fn split_terminator(buf: &[u8]) -> (&[u8], &[u8]) {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    buf.split_at(end)
}
