use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Range;

use ariadne::{Label, Report, ReportKind, Source};
use serde::{Deserialize, Serialize};

use crate::parser::PestError;

#[derive(Debug, Clone, PartialEq, Eq, Copy, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A compile failure with a source position.
///
/// Tokenising and grammar failures stay as [pest::error::Error]; everything
/// found while shaping the AST, visiting it or building the query is an
/// [Error] with one of the [Reason]s below.
#[derive(Debug, Clone)]
pub struct Error {
    pub span: Span,
    pub reason: Reason,
    pub help: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Expected {
        who: Option<String>,
        expected: String,
        found: String,
    },
    /// A `d`/`l` accessor outside the supported domain levels.
    OutOfRange {
        found: String,
        bounds: String,
    },
    /// An unresolved name; only functions can fail to resolve.
    NotFound {
        name: String,
        namespace: String,
    },
    /// A structural violation found while assembling the query.
    Build(String),
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            span: Span::default(),
            reason,
            help: None,
        }
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        if let Some(span) = span {
            self.span = span;
        }
        self
    }
}

// Needed for anyhow
impl StdError for Error {}

// Needed for StdError
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason.message())
    }
}

impl Reason {
    pub fn message(&self) -> String {
        match self {
            Reason::Expected {
                who,
                expected,
                found,
            } => {
                let who = who.clone().map(|x| format!("`{x}` ")).unwrap_or_default();
                format!("{who}expected {expected}, but found {found}")
            }
            Reason::OutOfRange { found, bounds } => format!("{found} is not in range {bounds}"),
            Reason::NotFound { name, namespace } => format!("{namespace} `{name}` not found"),
            Reason::Build(message) => message.clone(),
        }
    }
}

/// Report an error against its source with ariadne, falling back to plain
/// Display for errors that carry no position.
pub fn print_error(error: &anyhow::Error, source_id: &str, source: &str) {
    if let Some(error) = error.downcast_ref::<Error>() {
        let span = Range::from(error.span);

        let mut report = Report::build(ReportKind::Error, source_id, span.start)
            .with_message("")
            .with_label(Label::new((source_id, span)).with_message(error.reason.message()));

        if let Some(help) = &error.help {
            report.set_help(help);
        }

        report
            .finish()
            .eprint((source_id, Source::from(source)))
            .unwrap();

        return;
    }

    if let Some(error) = error.downcast_ref::<PestError>() {
        let span = pest::as_range(error);

        Report::build(ReportKind::Error, source_id, span.start)
            .with_message("during parsing")
            .with_label(Label::new((source_id, span)).with_message(pest::as_message(error)))
            .finish()
            .eprint((source_id, Source::from(source)))
            .unwrap();
        return;
    }

    // default to basic Display
    eprintln!("{error:}");
}

mod pest {
    use std::ops::Range;

    use itertools::Itertools;
    use pest::error::{ErrorVariant, InputLocation};

    use crate::parser::{PestError, PestRule};

    pub fn as_range(error: &PestError) -> Range<usize> {
        match error.location {
            InputLocation::Pos(r) => r..r + 1,
            InputLocation::Span(r) => r.0..r.1,
        }
    }

    pub fn as_message(error: &PestError) -> String {
        match error.variant {
            ErrorVariant::ParsingError {
                ref positives,
                ref negatives,
            } => match (negatives.is_empty(), positives.is_empty()) {
                (false, false) => format!(
                    "unexpected {}; expected {}",
                    enumerate(negatives),
                    enumerate(positives)
                ),
                (false, true) => format!("unexpected {}", enumerate(negatives)),
                (true, false) => format!("expected {}", enumerate(positives)),
                (true, true) => "unknown parsing error".to_owned(),
            },
            ErrorVariant::CustomError { ref message } => message.clone(),
        }
    }

    fn enumerate(rules: &[PestRule]) -> String {
        match rules {
            [rule] => format!("{rule:?}"),
            [init @ .., last] => format!(
                "{}, or {last:?}",
                init.iter().map(|x| format!("{x:?}")).join(", ")
            ),
            [] => String::new(),
        }
    }
}

impl From<Span> for Range<usize> {
    fn from(a: Span) -> Self {
        a.start..a.end
    }
}
