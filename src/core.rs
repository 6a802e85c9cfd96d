//! The comparison engine: errors, the report sink, and the interleave
//! scheduler that drives subject lines against the reference reader.
//!
//! The engine is single-threaded and cooperative: one [`Texst::check`] call
//! processes a subject stream end to end, pulling reference lines on demand.
//! Two independent engine values may run in parallel; one value must not be
//! used concurrently with itself.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::ops::Range;

use log::{debug, trace};
use thiserror::Error;

pub mod line;
pub mod reader;

pub use line::{Mask, MaskKind, RefLine};
pub use reader::RefReader;

// Errors
// ======

/// Why a reference document was rejected.
#[derive(Error, Debug)]
pub enum Reason {
    #[error("no reference line after preamble")]
    NoReferenceLine,
    #[error("invalid preamble line starting with '{0}'")]
    InvalidPreamble(char),
    #[error("redeclaring interleaving groups")]
    GroupsRedeclared,
    #[error("illegal interleaving group name '{0}'")]
    IllegalGroupName(char),
    #[error("preamble line after first reference line")]
    PreambleInBody,
    #[error("expected reference line marker '>', found '{0}'")]
    UnexpectedTag(char),
    #[error("incomplete reference line")]
    IncompleteRefLine,
    #[error("incomplete argument line")]
    IncompleteArgLine,
    #[error("unknown argument kind '{0}'")]
    UnknownArgKind(char),
    #[error("reference line in undeclared interleaving group '{0}'")]
    UndeclaredGroup(char),
    #[error("empty mask pattern")]
    EmptyMaskPattern,
    #[error("missing mask name in refinement")]
    MissingMaskName,
    #[error("empty character class for mask '{0}'")]
    EmptyClass(char),
    #[error("empty regular expression for mask '{0}'")]
    EmptyRegex(char),
    #[error("no mask '{0}' to refine")]
    NoMaskForRefinement(char),
    #[error("character class on regular-expression mask '{0}'")]
    ClassOnMatchMask(char),
    #[error("invalid UTF-8 encoding")]
    InvalidUtf8,
    #[error("bad mask regular expression: {0}")]
    BadRegex(regex::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
}

/// Error in the reference document: malformed syntax, bad regex, or a failed
/// read. Fatal for the comparison.
#[derive(Error, Debug)]
#[error("{name}:{line}: {reason}")]
pub struct RefError {
    pub name: String,
    pub line: usize,
    pub reason: Reason,
}

impl RefError {
    pub(crate) fn new(name: &str, line: usize, reason: Reason) -> Self {
        Self {
            name: name.to_string(),
            line,
            reason,
        }
    }
}

/// I/O error on the subject stream, tagged with the subject line it
/// interrupted.
#[derive(Error, Debug)]
#[error("subject line {line}: {source}")]
pub struct SubjError {
    pub line: usize,
    pub source: std::io::Error,
}

/// Errors that terminate a [`Texst::check`] run. Mismatches are not errors;
/// they are reported through the [`Sink`] and counted in the [`Outcome`].
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Subj(#[from] SubjError),
}

// Report sink
// ===========

/// Flow-control decision returned by [`Sink`] callbacks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Control {
    Continue,
    /// Stop the comparison; [`Texst::check`] returns with
    /// [`Outcome::aborted`] set.
    Abort,
}

/// Receives match and mismatch reports during a [`Texst::check`] run.
///
/// `()` is the silent sink: mismatches are only counted.
pub trait Sink {
    /// Called for each subject line that no interleaving-group head accepts,
    /// and once at end of subject (with an empty line) when reference lines
    /// remain unmatched. `candidates` holds the group heads that were tried,
    /// in declared group order; it is empty when the subject outran the
    /// reference.
    fn on_mismatch(&mut self, lineno: usize, line: &[u8], candidates: &[&RefLine]) -> Control;

    /// Called for each matched subject line with the accepting reference
    /// line and the byte span each of its masks captured.
    fn on_match(
        &mut self,
        lineno: usize,
        line: &[u8],
        reference: &RefLine,
        captures: &[Range<usize>],
    ) -> Control {
        let _ = (lineno, line, reference, captures);
        Control::Continue
    }
}

impl Sink for () {
    fn on_mismatch(&mut self, _: usize, _: &[u8], _: &[&RefLine]) -> Control {
        Control::Continue
    }
}

// Engine
// ======

/// Result of a completed [`Texst::check`] run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Outcome {
    /// Number of mismatches detected before the run ended.
    pub mismatches: usize,
    /// Whether a [`Sink`] callback requested the abort that ended the run.
    pub aborted: bool,
}

impl Outcome {
    /// The subject satisfies the reference.
    pub fn passed(&self) -> bool {
        self.mismatches == 0 && !self.aborted
    }
}

/// Compares a subject text against a reference text specification.
///
/// A default value is ready for use and may be reused for any number of
/// comparisons.
#[derive(Clone, Copy, Debug, Default)]
pub struct Texst {
    /// Number of detected mismatches after which the comparison stops
    /// consuming the subject. `0` means no limit.
    pub mismatch_limit: usize,
}

impl Texst {
    /// Compare the subject stream against the reference, reporting matches
    /// and mismatches to `sink`.
    ///
    /// # Errors
    ///
    /// - [`Error::Ref`] when the reference document is malformed or fails to
    ///   read; the comparison stops at the first such line.
    /// - [`Error::Subj`] when reading the subject fails.
    pub fn check<R, S, K>(
        &self,
        reference: &mut RefReader<R>,
        subject: S,
        sink: &mut K,
    ) -> Result<Outcome, Error>
    where
        R: BufRead,
        S: Read,
        K: Sink,
    {
        let mut backlogs = Backlogs::new(reference);
        let mut subject = BufReader::new(subject);
        let mut buf = Vec::new();
        let mut lineno = 0;
        let mut mismatches = 0;

        loop {
            buf.clear();
            let n = subject.read_until(b'\n', &mut buf).map_err(|source| {
                SubjError {
                    line: lineno + 1,
                    source,
                }
            })?;
            if n == 0 {
                break;
            }
            lineno += 1;
            let line = trim_line(&buf);

            backlogs.refill()?;
            match backlogs.select(line) {
                Some((group, captures)) => {
                    let matched = backlogs.pop(group);
                    trace!(
                        "subject line {lineno} matched {}:{}",
                        matched.source(),
                        matched.source_line()
                    );
                    let control = sink.on_match(lineno, line, &matched, &captures);
                    backlogs.reader.free_line(matched);
                    if control == Control::Abort {
                        return Ok(Outcome {
                            mismatches,
                            aborted: true,
                        });
                    }
                }
                None => {
                    mismatches += 1;
                    let candidates = backlogs.heads();
                    debug!(
                        "subject line {lineno} mismatch, {} candidate(s)",
                        candidates.len()
                    );
                    if sink.on_mismatch(lineno, line, &candidates) == Control::Abort {
                        return Ok(Outcome {
                            mismatches,
                            aborted: true,
                        });
                    }
                    if self.mismatch_limit > 0 && mismatches >= self.mismatch_limit {
                        debug!("mismatch limit {} reached", self.mismatch_limit);
                        return Ok(Outcome {
                            mismatches,
                            aborted: false,
                        });
                    }
                }
            }
        }

        // Notice reference lines that were buffered or never pulled: they
        // make the reference exceed the subject.
        backlogs.refill()?;
        if backlogs.pending() {
            mismatches += 1;
            let candidates = backlogs.heads();
            debug!(
                "subject ended, reference continues with {} candidate(s)",
                candidates.len()
            );
            let aborted = sink.on_mismatch(lineno + 1, b"", &candidates) == Control::Abort;
            return Ok(Outcome {
                mismatches,
                aborted,
            });
        }

        Ok(Outcome {
            mismatches,
            aborted: false,
        })
    }
}

/// Strip the line terminator from a raw subject chunk. A lone trailing `\r`
/// on the final chunk counts as a terminator too.
fn trim_line(buf: &[u8]) -> &[u8] {
    let mut line = buf;
    if line.last() == Some(&b'\n') {
        line = &line[..line.len() - 1];
    }
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    line
}

// Interleave scheduling
// =====================

/// Per-group FIFOs of reference lines read ahead of the matching cursor.
/// The queues own their records; matched records return to the reader pool.
struct Backlogs<'a, R> {
    reader: &'a mut RefReader<R>,
    groups: Vec<char>,
    queues: Vec<VecDeque<RefLine>>,
    exhausted: bool,
}

impl<'a, R: BufRead> Backlogs<'a, R> {
    fn new(reader: &'a mut RefReader<R>) -> Self {
        let groups = reader.igroups().to_vec();
        let queues = groups.iter().map(|_| VecDeque::new()).collect();
        Self {
            reader,
            groups,
            queues,
            exhausted: false,
        }
    }

    /// Pull reference lines until every group has a head candidate or the
    /// reader runs dry. Lines land in their declared group's queue, whatever
    /// group triggered the pull.
    fn refill(&mut self) -> Result<(), RefError> {
        while !self.exhausted && self.queues.iter().any(VecDeque::is_empty) {
            match self.reader.next_line()? {
                Some(line) => {
                    let group = self
                        .groups
                        .iter()
                        .position(|&g| g == line.igroup())
                        .expect("reader only yields declared groups");
                    self.queues[group].push_back(line);
                }
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    /// Try the group heads in declared order; the first whose head accepts
    /// the subject line wins.
    fn select(&self, line: &[u8]) -> Option<(usize, Vec<Range<usize>>)> {
        self.queues.iter().enumerate().find_map(|(group, queue)| {
            let head = queue.front()?;
            head.matches(line).map(|captures| (group, captures))
        })
    }

    fn pop(&mut self, group: usize) -> RefLine {
        self.queues[group]
            .pop_front()
            .expect("selected group has a head")
    }

    /// Current head of every non-empty queue, in declared group order.
    fn heads(&self) -> Vec<&RefLine> {
        self.queues.iter().filter_map(VecDeque::front).collect()
    }

    fn pending(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn check(reference: &str, subject: &str) -> Outcome {
        let mut ref_rd = RefReader::from_str("test", reference).expect("valid reference");
        Texst::default()
            .check(&mut ref_rd, subject.as_bytes(), &mut ())
            .expect("check completes")
    }

    /// Records every report; aborts after `abort_after` mismatches if set.
    #[derive(Default)]
    struct Recorder {
        mismatches: Vec<(usize, String, usize)>,
        matches: Vec<(usize, String, Vec<String>)>,
        abort_after: Option<usize>,
    }

    impl Sink for Recorder {
        fn on_mismatch(&mut self, lineno: usize, line: &[u8], candidates: &[&RefLine]) -> Control {
            self.mismatches.push((
                lineno,
                String::from_utf8_lossy(line).into_owned(),
                candidates.len(),
            ));
            match self.abort_after {
                Some(n) if self.mismatches.len() >= n => Control::Abort,
                _ => Control::Continue,
            }
        }

        fn on_match(
            &mut self,
            lineno: usize,
            line: &[u8],
            _reference: &RefLine,
            captures: &[std::ops::Range<usize>],
        ) -> Control {
            let caps = captures
                .iter()
                .map(|r| String::from_utf8_lossy(&line[r.clone()]).into_owned())
                .collect();
            self.matches
                .push((lineno, String::from_utf8_lossy(line).into_owned(), caps));
            Control::Continue
        }
    }

    #[test]
    fn mask_kinds() {
        struct TestCase {
            label: &'static str,
            reference: &'static str,
            subjects: &'static [(&'static str, usize)],
        }
        // A failed single-line comparison counts two mismatches: the
        // rejected subject line and the trailing unmatched reference line.
        let test_cases = [
            TestCase {
                label: "fix",
                reference: "> foo bar baz\n .    xxx",
                subjects: &[
                    ("foo XXX baz", 0),
                    ("foo XX baz", 2),
                    ("foo XXXX baz", 2),
                ],
            },
            TestCase {
                label: "zero or more",
                reference: "> foo bar baz\n *    xxx",
                subjects: &[
                    ("foo  baz", 0),
                    ("foo X baz", 0),
                    ("foo XXX baz", 0),
                    ("foo XXXX baz", 0),
                ],
            },
            TestCase {
                label: "one or more",
                reference: "> foo bar baz\n +    xxx",
                subjects: &[
                    ("foo  baz", 2),
                    ("foo X baz", 0),
                    ("foo XXX baz", 0),
                    ("foo XXXX baz", 0),
                ],
            },
            TestCase {
                label: "zero up to mask",
                reference: "> foo bar baz\n 0    xxx",
                subjects: &[
                    ("foo  baz", 0),
                    ("foo X baz", 0),
                    ("foo XXX baz", 0),
                    ("foo XXXX baz", 2),
                ],
            },
            TestCase {
                label: "one up to mask",
                reference: "> foo bar baz\n 1    xxx",
                subjects: &[
                    ("foo  baz", 2),
                    ("foo X baz", 0),
                    ("foo XXX baz", 0),
                    ("foo XXXX baz", 2),
                ],
            },
            TestCase {
                label: "at least mask",
                reference: "> foo bar baz\n -    xxx",
                subjects: &[
                    ("foo  baz", 2),
                    ("foo XX baz", 2),
                    ("foo XXX baz", 0),
                    ("foo XXXX baz", 0),
                ],
            },
            TestCase {
                label: "char class",
                reference: "> foo bar baz\n .    xxx\n ?x \\d",
                subjects: &[
                    ("foo abc baz", 2),
                    ("foo 123 baz", 0),
                    ("foo 1_3 baz", 2),
                ],
            },
            TestCase {
                label: "match",
                reference: "> foo bar baz\n .    xxx\n ~x \\d{3}",
                subjects: &[
                    ("foo 12 baz", 2),
                    ("foo 123 baz", 0),
                    ("foo 1_3 baz", 2),
                    ("foo 1234 baz", 2),
                ],
            },
        ];
        for tc in test_cases {
            for (subject, expect) in tc.subjects {
                let outcome = check(tc.reference, subject);
                assert_eq!(
                    outcome.mismatches, *expect,
                    "{}: [{}]",
                    tc.label, subject
                );
            }
        }
    }

    #[test]
    fn subject_and_reference_length() {
        let reference = "> line 1\n> line 2\n> line 3";
        let run = |subject: &str| {
            let mut ref_rd = RefReader::from_str("test", reference).unwrap();
            let mut rec = Recorder::default();
            let outcome = Texst::default()
                .check(&mut ref_rd, subject.as_bytes(), &mut rec)
                .unwrap();
            (outcome, rec.mismatches)
        };

        let (outcome, mm) = run("line 1\nline 2\nline 3");
        assert!(outcome.passed());
        assert!(mm.is_empty());

        // Subject too long: the extra line has no candidates left.
        let (outcome, mm) = run("line 1\nline 2\nline 3\nline 4");
        assert_eq!(outcome.mismatches, 1);
        assert_eq!(mm, vec![(4, "line 4".to_string(), 0)]);

        // Subject too short: one trailing mismatch names the leftover head.
        let (outcome, mm) = run("line 1\nline 2\n");
        assert_eq!(outcome.mismatches, 1);
        assert_eq!(mm, vec![(3, String::new(), 1)]);
    }

    #[test]
    fn interleaving_groups() {
        let reference = indoc! {"
            %%12
            >1line 1
            >1line 3
            >2line 2
            >2line 4"};
        assert!(check(reference, "line 1\nline 2\nline 3\nline 4").passed());
        assert!(check(reference, "line 1\nline 3\nline 2\nline 4").passed());
        // Any group's head may accept a subject line, so group 2 may go
        // first; order within one group stays binding.
        assert!(check(reference, "line 2\nline 1\nline 3\nline 4").passed());
        assert!(!check(reference, "line 3\nline 1\nline 2\nline 4").passed());
    }

    #[test]
    fn group_order_breaks_ties() {
        // Both heads accept every subject line; the declared order decides.
        let reference = indoc! {"
            %%ab
            >asame
            >bsame"};
        let mut ref_rd = RefReader::from_str("test", reference).unwrap();
        let mut rec = Recorder::default();
        let outcome = Texst::default()
            .check(&mut ref_rd, "same\nsame".as_bytes(), &mut rec)
            .unwrap();
        assert!(outcome.passed());
        assert_eq!(rec.matches.len(), 2);
    }

    #[test]
    fn match_captures() {
        let reference = "> foo bar baz\n .    xxx";
        let mut ref_rd = RefReader::from_str("test", reference).unwrap();
        let mut rec = Recorder::default();
        let outcome = Texst::default()
            .check(&mut ref_rd, "foo bar baz".as_bytes(), &mut rec)
            .unwrap();
        assert!(outcome.passed());
        assert_eq!(
            rec.matches,
            vec![(1, "foo bar baz".to_string(), vec!["bar".to_string()])]
        );
    }

    #[test]
    fn global_template_with_log_shape() {
        let reference = indoc! {"
            *.ttt tt tt tt tt ttt
            > Jun 27 21:58:11.112 INFO  [thread1] go"};
        assert!(check(reference, "Dec 01 09:01:59.999 INFO  [thread1] go").passed());
        let outcome = check(reference, "Dec 01 09:01:59.999 INFO  [thread2] go");
        assert_eq!(outcome.mismatches, 2);
    }

    #[test]
    fn mismatch_limit_stops_consumption() {
        let reference = "> a\n> b\n> c";
        let subject = "x\ny\nz";
        let mut ref_rd = RefReader::from_str("test", reference).unwrap();
        let mut rec = Recorder::default();
        let outcome = Texst { mismatch_limit: 2 }
            .check(&mut ref_rd, subject.as_bytes(), &mut rec)
            .unwrap();
        assert_eq!(outcome.mismatches, 2);
        assert!(!outcome.aborted);
        assert_eq!(rec.mismatches.len(), 2);
    }

    #[test]
    fn sink_abort() {
        let reference = "> a\n> b";
        let mut ref_rd = RefReader::from_str("test", reference).unwrap();
        let mut rec = Recorder {
            abort_after: Some(1),
            ..Recorder::default()
        };
        let outcome = Texst::default()
            .check(&mut ref_rd, "x\ny".as_bytes(), &mut rec)
            .unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.mismatches, 1);
        assert_eq!(rec.mismatches.len(), 1);
    }

    #[test]
    fn mismatch_candidates_cover_all_groups() {
        let reference = indoc! {"
            %%12
            >1one
            >2two"};
        let mut ref_rd = RefReader::from_str("test", reference).unwrap();
        let mut rec = Recorder::default();
        Texst::default()
            .check(&mut ref_rd, "three\none\ntwo".as_bytes(), &mut rec)
            .unwrap();
        assert_eq!(rec.mismatches, vec![(1, "three".to_string(), 2)]);
        assert_eq!(rec.matches.len(), 2);
    }

    #[test]
    fn crlf_subject_lines() {
        assert!(check("> foo\n> bar", "foo\r\nbar\r\n").passed());
    }

    #[test]
    fn empty_reference_text_matches_empty_subject_line() {
        assert!(check("> ", "\n").passed());
        // A subject without any line leaves the reference line trailing.
        assert_eq!(check("> ", "").mismatches, 1);
        assert_eq!(check("> ", "x").mismatches, 2);
    }
}
