//! Output classification - verdict markers and log cleanup per tool family
//!
//! Verification tools (JUnit runners, wrapped student programs) report
//! results as free text. Classification decides pass/fail by searching the
//! raw output for failure markers; cleanup and markup only shape the text
//! that gets displayed. The two never mix: markup runs on escaped text and
//! cannot change a verdict.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Verification-tool family a checker's output stems from.
///
/// Each family has its own runner invocation and cleanup rules. `Generic`
/// is for plain verification programs that only use the common markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Junit5,
    Junit4,
    Junit3,
    Generic,
}

impl Framework {
    /// Main class of the console test runner, where the family has one.
    ///
    /// JUnit 5 ships a standalone launcher jar instead of a runner class.
    pub fn runner_class(&self) -> Option<&'static str> {
        match self {
            Framework::Junit5 => None,
            Framework::Junit4 => Some("org.junit.runner.JUnitCore"),
            Framework::Junit3 => Some("junit.textui.TestRunner"),
            Framework::Generic => None,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Framework::Junit5 => "junit5",
            Framework::Junit4 => "junit4",
            Framework::Junit3 => "junit3",
            Framework::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

/// Failure markers shared by all families.
///
/// `Killed` covers the kernel OOM killer, the time-limit markers come from
/// legacy wrapper scripts that print them before aborting a run.
fn rx_fail() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"(?m)^(.*)(FAILURES!!!|your program crashed|cpu time limit exceeded|ABBRUCH DURCH ZEITUEBERSCHREITUNG|Could not find class|Killed|failures)(.*)$",
        )
        .unwrap()
    })
}

fn rx_passed() -> &'static [Regex; 2] {
    static RX: OnceLock<[Regex; 2]> = OnceLock::new();
    RX.get_or_init(|| {
        [
            Regex::new(r"(?m)^(.*)(\[OK\])(.*)$").unwrap(),
            Regex::new(r"(?m)^(.*)(Passed!)(.*)$").unwrap(),
        ]
    })
}

fn rx_failed() -> &'static [Regex; 2] {
    static RX: OnceLock<[Regex; 2]> = OnceLock::new();
    RX.get_or_init(|| {
        [
            Regex::new(r"(?m)^(.*)(\[X\])(.*)$").unwrap(),
            Regex::new(r"(?m)^(.*)(Failed!)(.*)$").unwrap(),
        ]
    })
}

fn rx_detail() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"(?m)^(.*)(Output was|But expected|Does not start with|Does not contain|Output should have been empty but was)(.*)$",
        )
        .unwrap()
    })
}

/// Collapse the launcher's failure listing down to the summary line.
fn rx_failure_block() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(?s)(\nFailures)(.*?)(\nTest run finished)").unwrap())
}

/// Container statistics lines of the JUnit 5 launcher summary.
fn rx_container_line() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"\[(.*?)containers(.*?)\n").unwrap())
}

/// Java stack-trace frame lines (`at pkg.Class.method(File.java:12)`).
///
/// Anchored to whole lines; removal must not splice the neighbours into
/// something that matches again.
fn rx_stack_frame() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(?m)^[ \t]*at .*\)\n").unwrap())
}

/// Pass/fail classification and display shaping for one tool family.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    framework: Framework,
}

impl Classifier {
    pub fn new(framework: Framework) -> Self {
        Self { framework }
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Whether the raw output carries no failure marker.
    ///
    /// Evaluated on the unprocessed tool output. Absence of markers is a
    /// pass; a success banner is not required.
    pub fn output_ok(&self, raw: &str) -> bool {
        !rx_fail().is_match(raw)
    }

    /// Strip runner noise from a log. Idempotent.
    pub fn clean(&self, log: &str) -> String {
        match self.framework {
            Framework::Junit5 => {
                let log = rx_failure_block().replace_all(log, "$3");
                let log = rx_container_line().replace_all(&log, "");
                rx_stack_frame().replace_all(&log, "").into_owned()
            }
            Framework::Junit4 | Framework::Junit3 => {
                rx_stack_frame().replace_all(log, "").into_owned()
            }
            Framework::Generic => log.to_string(),
        }
    }

    /// Wrap pass/fail marker lines in markup classes.
    ///
    /// Expects escaped text; the output is display-only and never fed back
    /// into classification.
    pub fn markup(&self, escaped: &str) -> String {
        let mut log = escaped.to_string();
        for rx in rx_passed() {
            log = rx
                .replace_all(&log, "$1<b class=\"passed\">$2</b>$3")
                .into_owned();
        }
        for rx in rx_failed() {
            log = rx
                .replace_all(&log, "$1<b class=\"error\">$2</b>$3")
                .into_owned();
        }
        log = rx_detail()
            .replace_all(&log, "$1<em class=\"error\">$2</em>$3")
            .into_owned();
        log
    }
}
