//! Using texst reference files from Rust tests.
//!
//! A [`RefRepo`] maps a test name (and an optional hint for tests that
//! check several subjects) to a reference file. [`Config::assert`] compares
//! a subject against that file and panics with a rendered report on any
//! mismatch, so it plugs directly into `#[test]` functions. [`Config::record`]
//! bootstraps a reference file from a known-good subject.
//!
//! ```no_run
//! use texst::testing;
//!
//! #[test]
//! fn greeting_output() {
//!     let output = "hello world";
//!     testing::assert_ref("greeting_output", "", output.as_bytes());
//! }
//! # fn main() {}
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use fs2::FileExt;

use crate::core::{Control, Error, Outcome, RefLine, RefReader, Sink, Texst};
use crate::prepare::Prepare;

/// Default suffix of reference files in a [`RefRepo`].
pub const STD_SUFFIX: &str = ".texst";

/// Maps test names to reference files below a repository directory.
#[derive(Clone, Debug)]
pub struct RefRepo {
    pub dir: PathBuf,
    /// Suffix appended to file names. `None` selects [`STD_SUFFIX`];
    /// `Some("")` turns suffixes off.
    pub suffix: Option<String>,
}

impl Default for RefRepo {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            suffix: None,
        }
    }
}

impl RefRepo {
    /// Path of the reference file for `test`. Without a hint this is
    /// `<dir>/<test><suffix>`; with one, `<dir>/<test>/<hint><suffix>` so a
    /// test can keep several references apart.
    pub fn filename(&self, test: &str, hint: &str) -> PathBuf {
        let suffix = self.suffix.as_deref().unwrap_or(STD_SUFFIX);
        if hint.is_empty() {
            return self.dir.join(format!("{test}{suffix}"));
        }
        if suffix.is_empty() || hint.ends_with(suffix) {
            self.dir.join(test).join(hint)
        } else {
            self.dir.join(test).join(format!("{hint}{suffix}"))
        }
    }
}

/// How reference files are resolved and checked.
#[derive(Clone, Debug)]
pub struct Config {
    pub repo: RefRepo,
    /// Passed through to [`Texst::mismatch_limit`].
    pub mismatch_limit: usize,
    /// Allow [`Config::record`] to replace an existing reference file.
    pub record_overwrite: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: RefRepo::default(),
            mismatch_limit: 1,
            record_overwrite: false,
        }
    }
}

impl Config {
    /// Compare `subject` against the test's reference file. Returns the
    /// outcome together with a rendered report line per mismatch and
    /// candidate.
    pub fn check<S: Read>(
        &self,
        test: &str,
        hint: &str,
        subject: S,
    ) -> Result<(Outcome, Vec<String>), Error> {
        let path = self.repo.filename(test, hint);
        let mut reference = RefReader::open(&path)?;
        let mut report = Report::default();
        let outcome = Texst {
            mismatch_limit: self.mismatch_limit,
        }
        .check(&mut reference, subject, &mut report)?;
        Ok((outcome, report.lines))
    }

    /// Like [`Config::check`], but panics on mismatches or errors so it can
    /// be used directly in tests.
    pub fn assert<S: Read>(&self, test: &str, hint: &str, subject: S) {
        let path = self.repo.filename(test, hint);
        match self.check(test, hint, subject) {
            Ok((outcome, _)) if outcome.passed() => {}
            Ok((outcome, report)) => panic!(
                "{} mismatch(es) with reference {}:\n{}",
                outcome.mismatches,
                path.display(),
                report.join("\n")
            ),
            Err(err) => panic!("checking against reference {}: {err}", path.display()),
        }
    }

    /// Write the test's reference file from a known-good subject via
    /// [`Prepare`]. Refuses to replace an existing file unless
    /// [`Config::record_overwrite`] is set. Parent directories are created;
    /// the file is truncated only after the exclusive lock is held.
    pub fn record<S: Read>(&self, test: &str, hint: &str, subject: S) -> io::Result<PathBuf> {
        let path = self.repo.filename(test, hint);
        if !self.record_overwrite && path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("reference file {} already exists", path.display()),
            ));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().write(true).create(true).open(&path)?;
        file.lock_exclusive()?;
        file.set_len(0)?;
        Prepare::default().text(BufReader::new(subject), &mut file)?;
        Ok(path)
    }
}

/// Compare `subject` against the default repository's reference for `test`,
/// panicking on any mismatch.
pub fn assert_ref<S: Read>(test: &str, hint: &str, subject: S) {
    Config::default().assert(test, hint, subject);
}

/// Record the reference file for `test` from `subject`, then panic so a
/// recording run cannot silently pass as a test run.
pub fn record<S: Read>(test: &str, hint: &str, subject: S) {
    match Config::default().record(test, hint, subject) {
        Ok(path) => panic!("recorded reference file {}", path.display()),
        Err(err) => panic!("recording reference failed: {err}"),
    }
}

/// Sink that renders mismatches the way the CLI does, one line per report.
#[derive(Default)]
struct Report {
    lines: Vec<String>,
}

impl Sink for Report {
    fn on_mismatch(&mut self, lineno: usize, line: &[u8], candidates: &[&RefLine]) -> Control {
        self.lines
            .push(format!("{lineno}: [{}]", String::from_utf8_lossy(line)));
        for candidate in candidates {
            self.lines.push(format!(
                "  ref:{} '{}' [{}]",
                candidate.source_line(),
                candidate.igroup(),
                candidate.text()
            ));
        }
        Control::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn repo_filenames() {
        struct TestCase {
            repo: RefRepo,
            test: &'static str,
            hint: &'static str,
            expect: &'static str,
        }
        let test_cases = [
            TestCase {
                repo: RefRepo::default(),
                test: "t1",
                hint: "",
                expect: "./t1.texst",
            },
            TestCase {
                repo: RefRepo::default(),
                test: "t1",
                hint: "variant",
                expect: "./t1/variant.texst",
            },
            TestCase {
                repo: RefRepo::default(),
                test: "t1",
                hint: "variant.texst",
                expect: "./t1/variant.texst",
            },
            TestCase {
                repo: RefRepo {
                    dir: PathBuf::from("testdata"),
                    suffix: Some(String::new()),
                },
                test: "t1",
                hint: "",
                expect: "testdata/t1",
            },
            TestCase {
                repo: RefRepo {
                    dir: PathBuf::from("testdata"),
                    suffix: Some(String::from(".ref")),
                },
                test: "t1",
                hint: "hx",
                expect: "testdata/t1/hx.ref",
            },
        ];
        for tc in test_cases {
            assert_eq!(
                tc.repo.filename(tc.test, tc.hint),
                PathBuf::from(tc.expect)
            );
        }
    }

    #[test]
    fn record_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            repo: RefRepo {
                dir: dir.path().to_path_buf(),
                suffix: None,
            },
            ..Config::default()
        };

        let path = config
            .record("recorded", "", "one\ntwo\n".as_bytes())
            .unwrap();
        assert!(path.ends_with("recorded.texst"));

        let (outcome, report) = config.check("recorded", "", "one\ntwo\n".as_bytes()).unwrap();
        assert!(outcome.passed(), "{report:?}");

        let (outcome, report) = config.check("recorded", "", "one\nTWO\n".as_bytes()).unwrap();
        assert_eq!(outcome.mismatches, 1);
        assert_eq!(report.len(), 2, "{report:?}");
        assert!(report[1].contains("[two]"), "{report:?}");
    }

    #[test]
    fn record_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            repo: RefRepo {
                dir: dir.path().to_path_buf(),
                suffix: None,
            },
            ..Config::default()
        };

        config.record("t", "", "a\n".as_bytes()).unwrap();
        let err = config.record("t", "", "b\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        config.record_overwrite = true;
        config.record("t", "", "b\n".as_bytes()).unwrap();
        let (outcome, _) = config.check("t", "", "b\n".as_bytes()).unwrap();
        assert!(outcome.passed());
    }

    #[test]
    fn check_reports_missing_reference() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            repo: RefRepo {
                dir: dir.path().to_path_buf(),
                suffix: None,
            },
            ..Config::default()
        };
        let err = config
            .check("no_such_test", "", "x".as_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::Ref(_)));
    }

    #[test]
    fn hints_keep_references_apart() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            repo: RefRepo {
                dir: dir.path().to_path_buf(),
                suffix: None,
            },
            ..Config::default()
        };
        config.record("multi", "first", "1\n".as_bytes()).unwrap();
        config.record("multi", "second", "2\n".as_bytes()).unwrap();
        let (outcome, _) = config.check("multi", "first", "1\n".as_bytes()).unwrap();
        assert!(outcome.passed());
        let (outcome, _) = config.check("multi", "second", "2\n".as_bytes()).unwrap();
        assert!(outcome.passed());
    }

    #[test]
    fn mismatch_limit_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut reference = fs::File::create(dir.path().join("lim.texst")).unwrap();
        write!(reference, "> a\n> b\n> c\n").unwrap();
        drop(reference);

        let config = Config {
            repo: RefRepo {
                dir: dir.path().to_path_buf(),
                suffix: None,
            },
            mismatch_limit: 2,
            ..Config::default()
        };
        let (outcome, _) = config.check("lim", "", "x\ny\nz\n".as_bytes()).unwrap();
        assert_eq!(outcome.mismatches, 2);
    }
}
