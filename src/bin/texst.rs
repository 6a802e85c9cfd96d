//! A command line tool for text tests: compare subjects against a reference
//! text specification, or prepare a verbatim reference from known-good
//! output.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use console::style;
use log::error;

use texst::testing::STD_SUFFIX;
use texst::{Control, Prepare, RefLine, RefReader, Sink, Texst};

#[derive(Parser)]
#[command(
    name = "texst",
    about = "Check text against reference text specifications",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a reference text file to subject files
    Compare(CompareArgs),
    /// Prepare basic reference text files from subjects
    Prepare(PrepareArgs),
}

#[derive(Args)]
struct CompareArgs {
    /// Stop after this many mismatches; 0 checks the whole subject
    #[arg(short = 'l', long = "limit", default_value_t = 0)]
    limit: usize,
    /// Show the composed regular expression of mismatching reference lines
    #[arg(short = 'm', long = "show-regex")]
    show_regex: bool,
    /// Reference text specification
    reference: PathBuf,
    /// Subject files; stdin when none are given
    subjects: Vec<PathBuf>,
}

#[derive(Args)]
struct PrepareArgs {
    /// Suffix for created reference text files
    #[arg(short = 's', long = "suffix", default_value = STD_SUFFIX)]
    suffix: String,
    /// Overwrite existing reference files
    #[arg(short = 'f', long = "force")]
    force: bool,
    /// Interleaving group for all reference lines
    #[arg(short = 'g', long = "igroup", default_value_t = ' ')]
    igroup: char,
    /// Subject files; stdin to stdout when none are given
    subjects: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Compare(args) => compare(&args),
        Commands::Prepare(args) => prepare(&args),
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// compare
// =======

fn compare(args: &CompareArgs) -> bool {
    if args.subjects.is_empty() {
        return check_subject(args, "stdin", io::stdin().lock());
    }
    let mut ok = true;
    for subject in &args.subjects {
        match File::open(subject) {
            Ok(file) => {
                let name = subject.display().to_string();
                ok &= check_subject(args, &name, BufReader::new(file));
            }
            Err(err) => {
                error!("{}: {err}", subject.display());
                ok = false;
            }
        }
    }
    ok
}

fn check_subject<S: Read>(args: &CompareArgs, name: &str, subject: S) -> bool {
    let mut reference = match RefReader::open(&args.reference) {
        Ok(reference) => reference,
        Err(err) => {
            error!("{err}");
            return false;
        }
    };
    let mut report = MismatchReport {
        subject: name,
        show_regex: args.show_regex,
    };
    let texst = Texst {
        mismatch_limit: args.limit,
    };
    match texst.check(&mut reference, subject, &mut report) {
        Ok(outcome) if outcome.passed() => {
            eprintln!("{name} matches reference {}", args.reference.display());
            true
        }
        Ok(outcome) => {
            eprintln!(
                "{name} has {} mismatch(es) with {}",
                outcome.mismatches,
                args.reference.display()
            );
            false
        }
        Err(err) => {
            error!("check error: {err}");
            false
        }
    }
}

struct MismatchReport<'a> {
    subject: &'a str,
    show_regex: bool,
}

impl Sink for MismatchReport<'_> {
    fn on_mismatch(&mut self, lineno: usize, line: &[u8], candidates: &[&RefLine]) -> Control {
        eprintln!(
            "{}:{lineno}: [{}]",
            self.subject,
            String::from_utf8_lossy(line)
        );
        for candidate in candidates {
            if self.show_regex {
                eprintln!(
                    "  ref:{} '{}' ~ {}",
                    candidate.source_line(),
                    candidate.igroup(),
                    candidate.pattern().unwrap_or("<verbatim>")
                );
            } else {
                eprintln!(
                    "  ref:{} '{}' [{}]",
                    candidate.source_line(),
                    candidate.igroup(),
                    with_masks(candidate, line)
                );
            }
        }
        Control::Continue
    }
}

/// Render a candidate's text with masked regions dimmed and the fixed
/// regions diffed against the subject line. Styling degrades to plain text
/// when stderr is not a terminal.
fn with_masks(candidate: &RefLine, subject: &[u8]) -> String {
    let text = candidate.text();
    let mut out = String::new();
    let mut at = 0;
    for span in candidate.mask_spans() {
        if at < span.start {
            out.push_str(&diff_part(
                subject.get(at..).unwrap_or_default(),
                &text[at..span.start],
            ));
        }
        out.push_str(
            &style(&text[span.start..span.end])
                .for_stderr()
                .dim()
                .to_string(),
        );
        at = span.end;
    }
    if at < text.len() {
        out.push_str(&diff_part(
            subject.get(at..).unwrap_or_default(),
            &text[at..],
        ));
    }
    out
}

/// Color a fixed region of reference text by comparing it runewise with the
/// subject bytes at the same offsets: matching runs come out green,
/// diverging runs red and underlined.
fn diff_part(subject: &[u8], reference: &str) -> String {
    let subject = String::from_utf8_lossy(subject);
    let mut subject = subject.chars();
    let mut out = String::new();
    let mut run = String::new();
    let mut run_eq = true;
    for rune in reference.chars() {
        let eq = subject.next() == Some(rune);
        if eq != run_eq && !run.is_empty() {
            out.push_str(&flush(&run, run_eq));
            run.clear();
        }
        run_eq = eq;
        run.push(rune);
    }
    if !run.is_empty() {
        out.push_str(&flush(&run, run_eq));
    }
    out
}

fn flush(run: &str, eq: bool) -> String {
    if eq {
        style(run).for_stderr().green().to_string()
    } else {
        style(run).for_stderr().red().underlined().to_string()
    }
}

// prepare
// =======

fn prepare(args: &PrepareArgs) -> bool {
    let prepare = Prepare {
        igroup: args.igroup,
    };
    if args.subjects.is_empty() {
        let stdin = io::stdin();
        let mut stdout = io::stdout().lock();
        if let Err(err) = prepare.text(stdin.lock(), &mut stdout) {
            error!("prepare: {err}");
            return false;
        }
        return true;
    }
    let mut ok = true;
    for subject in &args.subjects {
        if let Err(err) = prepare_file(&prepare, subject, &args.suffix, args.force) {
            error!("{}: {err}", subject.display());
            ok = false;
        }
    }
    ok
}

fn prepare_file(prepare: &Prepare, subject: &Path, suffix: &str, force: bool) -> io::Result<()> {
    let mut reference = subject.as_os_str().to_os_string();
    reference.push(suffix);
    let reference = PathBuf::from(reference);
    if !force && reference.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", reference.display()),
        ));
    }
    let subject = BufReader::new(File::open(subject)?);
    let mut out = File::create(&reference)?;
    prepare.text(subject, &mut out)?;
    out.flush()
}
