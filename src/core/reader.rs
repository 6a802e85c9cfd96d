//! The reference reader: a two-phase iterator that turns a reference
//! document into [`RefLine`] records.
//!
//! The *preamble phase* runs once on construction and consumes interleaving
//! group declarations (`%%…`) and global mask lines until the first `>` line
//! is peeked. The *body phase* ([`RefReader::next_line`]) then produces one
//! record per call: a `>` line, its attached argument lines, and the global
//! template overlays, compiled into a matcher.
//!
//! Syntax errors are reported with source name and line; the reader stops at
//! the first malformed line.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::trace;

use super::line::{MaskKind, Masks, RefLine};
use super::{RefError, Reason};
use crate::{TAG_GLOBAL_ARG, TAG_LINE_ARG, TAG_PREAMBLE, TAG_REF_LINE};

/// Runes that cannot name an interleaving group.
const NOT_IGROUP: &str = "#%*>";

#[derive(Debug)]
pub struct RefReader<R> {
    source: Arc<str>,
    input: R,
    /// One logical line of lookahead; `Some(None)` once the input is drained.
    peeked: Option<Option<String>>,
    lno: usize,
    igroups: Vec<char>,
    igroups_declared: bool,
    template_all: Masks,
    template_group: HashMap<char, Masks>,
    pool: Vec<RefLine>,
}

impl<R: BufRead> RefReader<R> {
    /// Open a reference document on a byte stream. Consumes the preamble, so
    /// group declarations and global mask errors surface here.
    pub fn new(name: &str, input: R) -> Result<Self, RefError> {
        let mut reader = Self {
            source: Arc::from(name),
            input,
            peeked: None,
            lno: 0,
            igroups: Vec::new(),
            igroups_declared: false,
            template_all: Masks::default(),
            template_group: HashMap::new(),
            pool: Vec::new(),
        };
        reader.preamble()?;
        if reader.igroups.is_empty() {
            reader.igroups.push(' ');
        }
        Ok(reader)
    }

    /// Name of the reference document.
    pub fn name(&self) -> &str {
        &self.source
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.lno
    }

    /// The declared interleaving groups, in scheduling-priority order.
    pub fn igroups(&self) -> &[char] {
        &self.igroups
    }

    /// Produce the next reference-line record, or `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<RefLine>, RefError> {
        loop {
            let Some(tag) = self.peek_tag()? else {
                return Ok(None);
            };
            let Some(tag) = tag else {
                self.take();
                continue;
            };
            match tag {
                TAG_REF_LINE => break,
                TAG_GLOBAL_ARG => {
                    let line = self.take();
                    self.global_arg(None, &line)?;
                }
                TAG_PREAMBLE => return Err(self.error(Reason::PreambleInBody)),
                g if g != ' ' && self.igroups.contains(&g) => {
                    let line = self.take();
                    self.global_arg(Some(g), &line)?;
                }
                other => return Err(self.error(Reason::UnexpectedTag(other))),
            }
        }

        let line = self.take();
        let line_no = self.lno;
        let source = self.source.clone();
        let mut chars = line.chars();
        chars.next();
        let Some(igroup) = chars.next() else {
            return Err(RefError::new(&source, line_no, Reason::IncompleteRefLine));
        };
        if !self.igroups.contains(&igroup) {
            return Err(RefError::new(
                &source,
                line_no,
                Reason::UndeclaredGroup(igroup),
            ));
        }

        let mut rl = self.new_line(igroup, chars.as_str(), line_no);
        for mask in self.template_all.as_slice() {
            rl.masks_mut().add(mask.clone());
        }
        if let Some(template) = self.template_group.get(&igroup) {
            for mask in template.as_slice() {
                rl.masks_mut().add(mask.clone());
            }
        }

        loop {
            let Some(tag) = self.peek_tag()? else {
                break;
            };
            match tag {
                // An empty line ends argument attachment.
                None => {
                    self.take();
                    break;
                }
                Some(TAG_LINE_ARG) => {
                    let arg = self.take();
                    let arg_no = self.lno;
                    let mut chars = arg.chars();
                    chars.next();
                    Self::apply_arg(rl.masks_mut(), chars.as_str())
                        .map_err(|reason| RefError::new(&source, arg_no, reason))?;
                }
                Some(_) => break,
            }
        }

        rl.compile()
            .map_err(|reason| RefError::new(&source, line_no, reason))?;
        trace!(
            "reference {}:{} group '{}' pattern {:?}",
            source,
            line_no,
            igroup,
            rl.pattern()
        );
        Ok(Some(rl))
    }

    /// Return a record to the reader's pool so its buffers can be reused by
    /// a later [`RefReader::next_line`] call.
    pub fn free_line(&mut self, line: RefLine) {
        self.pool.push(line);
    }

    // Preamble phase
    // ==============

    fn preamble(&mut self) -> Result<(), RefError> {
        loop {
            let Some(tag) = self.peek_tag()? else {
                return Err(self.error(Reason::NoReferenceLine));
            };
            let Some(tag) = tag else {
                self.take();
                continue;
            };
            match tag {
                TAG_REF_LINE => return Ok(()),
                TAG_PREAMBLE => {
                    let line = self.take();
                    self.declare_igroups(&line)?;
                }
                TAG_GLOBAL_ARG => {
                    let line = self.take();
                    self.global_arg(None, &line)?;
                }
                g if g != ' ' && self.igroups.contains(&g) => {
                    let line = self.take();
                    self.global_arg(Some(g), &line)?;
                }
                other => return Err(self.error(Reason::InvalidPreamble(other))),
            }
        }
    }

    /// Handle a `%%…` preamble line declaring the interleaving groups.
    fn declare_igroups(&mut self, line: &str) -> Result<(), RefError> {
        let mut chars = line.chars();
        chars.next();
        if chars.next() != Some(TAG_PREAMBLE) {
            return Err(self.error(Reason::InvalidPreamble(TAG_PREAMBLE)));
        }
        if self.igroups_declared {
            return Err(self.error(Reason::GroupsRedeclared));
        }
        for group in chars.clone() {
            if NOT_IGROUP.contains(group) {
                return Err(self.error(Reason::IllegalGroupName(group)));
            }
        }
        self.igroups = chars.collect();
        self.igroups_declared = true;
        Ok(())
    }

    /// Handle a global mask line: `*…` applies to all groups, `<g>…` to the
    /// declared group `g` only. Accumulates into the matching template.
    fn global_arg(&mut self, group: Option<char>, line: &str) -> Result<(), RefError> {
        let source = self.source.clone();
        let line_no = self.lno;
        let mut chars = line.chars();
        chars.next();
        let template = match group {
            None => &mut self.template_all,
            Some(g) => self.template_group.entry(g).or_default(),
        };
        Self::apply_arg(template, chars.as_str())
            .map_err(|reason| RefError::new(&source, line_no, reason))
    }

    /// Apply one argument line (sans its column-0 tag) to a mask set.
    fn apply_arg(masks: &mut Masks, arg: &str) -> Result<(), Reason> {
        let mut chars = arg.chars();
        let Some(tag) = chars.next() else {
            return Err(Reason::IncompleteArgLine);
        };
        let rest = chars.as_str();
        match tag {
            '?' => masks.set_class(rest),
            '~' => masks.set_regex(rest),
            tag => match MaskKind::from_tag(tag) {
                Some(kind) => masks.pattern(rest, kind),
                None => Err(Reason::UnknownArgKind(tag)),
            },
        }
    }

    // Line scanning
    // =============

    /// First rune of the next logical line: outer `None` at end of stream,
    /// inner `None` for an empty line.
    fn peek_tag(&mut self) -> Result<Option<Option<char>>, RefError> {
        if self.peeked.is_none() {
            let line = self.scan()?;
            self.peeked = Some(line);
        }
        match &self.peeked {
            Some(line) => Ok(line.as_ref().map(|l| l.chars().next())),
            None => unreachable!("lookahead was just filled"),
        }
    }

    /// Consume the line made current by the last [`Self::peek_tag`].
    fn take(&mut self) -> String {
        match self.peeked.take() {
            Some(Some(line)) => line,
            _ => unreachable!("take() is only called after a successful peek"),
        }
    }

    /// Read the next line, skipping comments, stripping the terminator and
    /// validating UTF-8.
    fn scan(&mut self) -> Result<Option<String>, RefError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = self
                .input
                .read_until(b'\n', &mut buf)
                .map_err(|e| RefError::new(&self.source, self.lno + 1, Reason::Io(e)))?;
            if n == 0 {
                return Ok(None);
            }
            self.lno += 1;
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.first() == Some(&(crate::TAG_COMMENT as u8)) {
                continue;
            }
            let line = String::from_utf8(std::mem::take(&mut buf))
                .map_err(|_| RefError::new(&self.source, self.lno, Reason::InvalidUtf8))?;
            return Ok(Some(line));
        }
    }

    fn new_line(&mut self, igroup: char, text: &str, line_no: usize) -> RefLine {
        match self.pool.pop() {
            Some(mut line) => {
                line.reset(self.source.clone(), line_no, igroup, text);
                line
            }
            None => RefLine::new(self.source.clone(), line_no, igroup, text),
        }
    }

    fn error(&self, reason: Reason) -> RefError {
        RefError::new(&self.source, self.lno, reason)
    }
}

impl<'a> RefReader<&'a [u8]> {
    /// Read a reference document from a string.
    pub fn from_str(name: &str, text: &'a str) -> Result<Self, RefError> {
        Self::new(name, text.as_bytes())
    }
}

impl RefReader<BufReader<File>> {
    /// Open a reference file, holding a shared lock for the lifetime of the
    /// reader so a concurrent recorder cannot rewrite it mid-comparison.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RefError> {
        let name = path.as_ref().display().to_string();
        let file = (|| {
            let file = OpenOptions::new().read(true).open(&path)?;
            file.lock_shared()?;
            io::Result::Ok(file)
        })()
        .map_err(|e| RefError::new(&name, 0, Reason::Io(e)))?;
        Self::new(&name, BufReader::new(file))
    }
}
