//! Reference-line data model: masks, the overlay rule for stacked mask
//! declarations, and the compiled per-line matcher.
//!
//! Mask coordinates are measured in *runes* (`char`s) of the reference text,
//! because mask declarations are positioned under the text by column. The
//! compiled matcher works on the subject as raw bytes, so captures come back
//! byte-addressed; [`RefLine::mask_spans`] carries the rune-to-byte
//! translation for the reference side.

use std::ops::Range;
use std::sync::Arc;

use regex::bytes::Regex;

use super::Reason;

// Mask kinds
// ==========

/// How a masked region of the reference text is allowed to differ from the
/// subject line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaskKind {
    /// Exactly as many runes as the mask is wide (tag `.`).
    Fix,
    /// Any number of runes, including none (tag `*`).
    ZeroOrMore,
    /// One or more runes (tag `+`).
    OneOrMore,
    /// Up to as many runes as the mask is wide (tag `0`).
    ZeroUpTo,
    /// One rune up to the mask width (tag `1`).
    OneUpTo,
    /// At least as many runes as the mask is wide (tag `-`).
    AtLeast,
    /// The masked part must match a regular expression (argument tag `~`).
    Match,
}

impl MaskKind {
    /// Map an argument-line kind tag to its mask kind. `?` and `~` are
    /// refinement tags, not kinds, and are handled by the reader.
    pub(crate) fn from_tag(tag: char) -> Option<MaskKind> {
        match tag {
            '.' => Some(MaskKind::Fix),
            '*' => Some(MaskKind::ZeroOrMore),
            '+' => Some(MaskKind::OneOrMore),
            '0' => Some(MaskKind::ZeroUpTo),
            '1' => Some(MaskKind::OneUpTo),
            '-' => Some(MaskKind::AtLeast),
            _ => None,
        }
    }

    /// The kind tag as it appears in a reference document.
    pub fn tag(&self) -> char {
        match self {
            MaskKind::Fix => '.',
            MaskKind::ZeroOrMore => '*',
            MaskKind::OneOrMore => '+',
            MaskKind::ZeroUpTo => '0',
            MaskKind::OneUpTo => '1',
            MaskKind::AtLeast => '-',
            MaskKind::Match => '~',
        }
    }
}

// Masks
// =====

/// A region of a reference line's text that does not need to match the
/// subject verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    name: char,
    kind: MaskKind,
    start: usize,
    len: usize,
    class: Option<String>,
    regex: Option<String>,
}

impl Mask {
    pub(crate) fn new(name: char, kind: MaskKind, start: usize, len: usize) -> Self {
        Self {
            name,
            kind,
            start,
            len,
            class: None,
            regex: None,
        }
    }

    /// The rune naming this mask in argument lines.
    pub fn name(&self) -> char {
        self.name
    }

    pub fn kind(&self) -> MaskKind {
        self.kind
    }

    /// Mask start, in runes of the reference text.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Mask width, in runes of the reference text.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The character class constraining runes inside the mask, if any.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// The regular expression of a [`MaskKind::Match`] mask.
    pub fn regex(&self) -> Option<&str> {
        self.regex.as_deref()
    }

    fn end(&self) -> usize {
        self.start + self.len
    }

    /// Remove the runes covered by `other` from this mask. When `other` sits
    /// in the middle, the rightmost remaining part is returned as a split-off
    /// mask and `self` keeps the left part.
    fn cut(&mut self, other: &Mask) -> Option<Mask> {
        if self.start < other.start {
            if self.end() > other.end() {
                let split = Mask {
                    name: self.name,
                    kind: self.kind,
                    start: other.end(),
                    len: self.end() - other.end(),
                    class: self.class.clone(),
                    regex: self.regex.clone(),
                };
                self.len = other.start - self.start;
                return Some(split);
            }
            if self.end() > other.start {
                self.len = other.start - self.start;
            }
        } else if self.end() <= other.end() {
            self.len = 0;
        } else if other.end() > self.start {
            let cut_to = other.end();
            self.len = self.end() - cut_to;
            self.start = cut_to;
        }
        None
    }

    /// Append this mask's capture group to a composed pattern.
    fn emit(&self, pattern: &mut String) {
        pattern.push('(');
        if self.kind == MaskKind::Match {
            if let Some(regex) = &self.regex {
                pattern.push_str(regex);
            }
        } else {
            pattern.push_str(self.class.as_deref().unwrap_or("."));
            match self.kind {
                MaskKind::Fix => pattern.push_str(&format!("{{{}}}", self.len)),
                MaskKind::ZeroOrMore => pattern.push_str("{0,}"),
                MaskKind::OneOrMore => pattern.push_str("{1,}"),
                MaskKind::ZeroUpTo => pattern.push_str(&format!("{{0,{}}}", self.len)),
                MaskKind::OneUpTo => pattern.push_str(&format!("{{1,{}}}", self.len)),
                MaskKind::AtLeast => pattern.push_str(&format!("{{{},}}", self.len)),
                MaskKind::Match => unreachable!("handled above"),
            }
        }
        pattern.push(')');
    }
}

/// The masks of one reference line (or of a global template), kept in
/// ascending start order without overlaps.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Masks(Vec<Mask>);

impl Masks {
    pub(crate) fn as_slice(&self) -> &[Mask] {
        &self.0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }

    /// Insert a mask. A later declaration wins on overlap: covered parts of
    /// existing masks are cut away, keeping any non-overlapping residue
    /// (splitting it in two when the new mask lands in the middle). Residues
    /// that end up empty are dropped.
    pub(crate) fn add(&mut self, new: Mask) {
        if new.is_empty() {
            return;
        }
        if self.0.is_empty() {
            self.0.push(new);
            return;
        }
        let mut merged = Vec::with_capacity(self.0.len() + 2);
        let mut insert = true;
        for mut old in std::mem::take(&mut self.0) {
            let before = old.start < new.start;
            let split = old.cut(&new);
            if insert {
                if before {
                    if !old.is_empty() {
                        merged.push(old);
                    }
                    if let Some(split) = split {
                        merged.push(new.clone());
                        merged.push(split);
                        insert = false;
                    }
                } else {
                    merged.push(new.clone());
                    insert = false;
                    if !old.is_empty() {
                        merged.push(old);
                    }
                }
            } else if !old.is_empty() {
                merged.push(old);
            }
        }
        if insert {
            merged.push(new);
        }
        self.0 = merged;
    }

    /// Parse a mask-pattern line: each run of identical non-space runes
    /// declares one mask named by that rune, covering the aligned rune range.
    pub(crate) fn pattern(&mut self, pattern: &str, kind: MaskKind) -> Result<(), Reason> {
        if pattern.is_empty() {
            return Err(Reason::EmptyMaskPattern);
        }
        let mut name = ' ';
        let mut start = 0;
        let mut count = 0;
        for (i, c) in pattern.chars().enumerate() {
            count = i + 1;
            if c == name {
                continue;
            }
            if !name.is_whitespace() {
                self.add(Mask::new(name, kind, start, i - start));
            }
            name = c;
            start = i;
        }
        if !name.is_whitespace() {
            self.add(Mask::new(name, kind, start, count - start));
        }
        Ok(())
    }

    /// Apply a `?name class` refinement to every mask with that name.
    pub(crate) fn set_class(&mut self, arg: &str) -> Result<(), Reason> {
        let (name, class) = split_refinement(arg)?;
        if class.is_empty() {
            return Err(Reason::EmptyClass(name));
        }
        let mut applied = 0;
        for mask in self.0.iter_mut().filter(|m| m.name == name) {
            if mask.kind == MaskKind::Match {
                return Err(Reason::ClassOnMatchMask(name));
            }
            mask.class = Some(class.to_string());
            applied += 1;
        }
        if applied == 0 {
            return Err(Reason::NoMaskForRefinement(name));
        }
        Ok(())
    }

    /// Apply a `~name regex` refinement, turning every mask with that name
    /// into a [`MaskKind::Match`] mask whatever its declared kind.
    pub(crate) fn set_regex(&mut self, arg: &str) -> Result<(), Reason> {
        let (name, regex) = split_refinement(arg)?;
        if regex.is_empty() {
            return Err(Reason::EmptyRegex(name));
        }
        let mut applied = 0;
        for mask in self.0.iter_mut().filter(|m| m.name == name) {
            mask.kind = MaskKind::Match;
            mask.regex = Some(regex.to_string());
            applied += 1;
        }
        if applied == 0 {
            return Err(Reason::NoMaskForRefinement(name));
        }
        Ok(())
    }

    /// Restrict all masks to the first `len` runes, dropping what is left
    /// empty. Global templates may be wider than a short reference line.
    fn clamp_to(&mut self, len: usize) {
        self.0.retain_mut(|mask| {
            if mask.start >= len {
                return false;
            }
            if mask.end() > len {
                mask.len = len - mask.start;
            }
            true
        });
    }
}

fn split_refinement(arg: &str) -> Result<(char, &str), Reason> {
    let mut chars = arg.chars();
    let name = chars.next().ok_or(Reason::MissingMaskName)?;
    Ok((name, chars.as_str().trim()))
}

// Reference lines
// ===============

/// One line of reference text together with its compiled matcher. Engine
/// users see these as mismatch candidates and match reports.
#[derive(Debug)]
pub struct RefLine {
    source: Arc<str>,
    source_line: usize,
    igroup: char,
    text: String,
    masks: Masks,
    spans: Vec<Range<usize>>,
    pattern: String,
    rgx: Option<Regex>,
}

impl RefLine {
    pub(crate) fn new(source: Arc<str>, source_line: usize, igroup: char, text: &str) -> Self {
        Self {
            source,
            source_line,
            igroup,
            text: text.to_string(),
            masks: Masks::default(),
            spans: Vec::new(),
            pattern: String::new(),
            rgx: None,
        }
    }

    /// Re-initialize a pooled record, keeping its buffers.
    pub(crate) fn reset(&mut self, source: Arc<str>, source_line: usize, igroup: char, text: &str) {
        self.source = source;
        self.source_line = source_line;
        self.igroup = igroup;
        self.text.clear();
        self.text.push_str(text);
        self.masks.clear();
        self.spans.clear();
        self.pattern.clear();
        self.rgx = None;
    }

    /// Name of the reference document this line was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 1-based line number in the reference document.
    pub fn source_line(&self) -> usize {
        self.source_line
    }

    /// The line's interleaving group.
    pub fn igroup(&self) -> char {
        self.igroup
    }

    /// The verbatim reference text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn masks(&self) -> &[Mask] {
        self.masks.as_slice()
    }

    /// Byte ranges of the masks within [`RefLine::text`], parallel to
    /// [`RefLine::masks`].
    pub fn mask_spans(&self) -> &[Range<usize>] {
        &self.spans
    }

    /// The composed regular expression, or `None` for a verbatim line.
    pub fn pattern(&self) -> Option<&str> {
        self.rgx.as_ref().map(|_| self.pattern.as_str())
    }

    pub(crate) fn masks_mut(&mut self) -> &mut Masks {
        &mut self.masks
    }

    /// Compose and compile the matcher from the accumulated masks. Literal
    /// runs between masks are escaped; each mask becomes one capture group.
    pub(crate) fn compile(&mut self) -> Result<(), Reason> {
        let text_runes = self.text.chars().count();
        self.masks.clamp_to(text_runes);
        self.spans.clear();
        self.pattern.clear();
        if self.masks.is_empty() {
            self.rgx = None;
            return Ok(());
        }
        self.pattern.push('^');
        let mut rune_at = 0;
        let mut byte_at = 0;
        for mask in self.masks.as_slice() {
            let start = byte_at + rune_width(&self.text[byte_at..], mask.start - rune_at);
            let end = start + rune_width(&self.text[start..], mask.len);
            self.pattern.push_str(&regex::escape(&self.text[byte_at..start]));
            mask.emit(&mut self.pattern);
            self.spans.push(start..end);
            rune_at = mask.end();
            byte_at = end;
        }
        self.pattern.push_str(&regex::escape(&self.text[byte_at..]));
        self.pattern.push('$');
        self.rgx = Some(Regex::new(&self.pattern).map_err(Reason::BadRegex)?);
        Ok(())
    }

    /// Match a subject line. On success the returned ranges are the byte
    /// spans in `line` captured by each mask, in mask order.
    pub fn matches(&self, line: &[u8]) -> Option<Vec<Range<usize>>> {
        match &self.rgx {
            None => (self.text.as_bytes() == line).then(Vec::new),
            Some(rgx) => {
                let caps = rgx.captures(line)?;
                Some(
                    (1..=self.masks.len())
                        .map(|i| caps.get(i).map_or(0..0, |m| m.range()))
                        .collect(),
                )
            }
        }
    }
}

/// Byte width of the first `runes` runes of `s`.
fn rune_width(s: &str, runes: usize) -> usize {
    s.char_indices().nth(runes).map_or(s.len(), |(i, _)| i)
}
