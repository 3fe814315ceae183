//! Fault normalisation.
//!
//! Every fault shape the process can produce (error values, promoted runtime
//! faults, panics) is folded into one immutable [`FaultRecord`] by
//! [`classify`]. Classification is total: it never fails and never panics.

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad category of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// An error value that reached a fault handler.
    Exception,
    /// A runtime warning, notice or deprecation promoted to an error.
    RuntimeError,
    /// A panic: the thread could not continue.
    FatalError,
}

impl FaultKind {
    /// Stable lowercase label used in reports and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exception => "exception",
            Self::RuntimeError => "runtime_error",
            Self::FatalError => "fatal_error",
        }
    }

    fn placeholder_message(self) -> &'static str {
        match self {
            Self::Exception => "error without a message",
            Self::RuntimeError => "runtime fault without a message",
            Self::FatalError => "panic without a message",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file and line in the source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file path as reported by the compiler or backtrace.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

impl SourceLocation {
    /// Create a location from a file path and line.
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One frame of a stack trace, outermost call last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Position in the trace, 0 being the innermost frame.
    pub index: usize,
    /// Demangled symbol name, or `<unknown>`.
    pub symbol: String,
    /// Source position, when debug info was available.
    pub location: Option<SourceLocation>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "#{} {} ({location})", self.index, self.symbol),
            None => write!(f, "#{} {}", self.index, self.symbol),
        }
    }
}

/// Severity of a runtime fault, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Use of something scheduled for removal.
    Deprecated,
    /// Something unusual that is probably harmless.
    Notice,
    /// Something wrong that did not stop execution.
    Warning,
}

impl Severity {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deprecated => "deprecated",
            Self::Notice => "notice",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal runtime fault promoted to a catchable error.
///
/// Produced by [`ErrorCaptureAdapter::raise`](crate::capture::ErrorCaptureAdapter::raise)
/// and propagated with `?` like any other error. [`classify`] recognises it
/// and records it as [`FaultKind::RuntimeError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{severity}: {message}")]
pub struct RuntimeFault {
    severity: Severity,
    message: String,
    location: SourceLocation,
}

impl RuntimeFault {
    /// Create a runtime fault located at the caller.
    #[track_caller]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: SourceLocation::from(Location::caller()),
        }
    }

    /// How serious the fault is.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The message the fault was raised with.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Where the fault was raised.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }
}

enum RawSource<'a> {
    Error(&'a (dyn StdError + 'static)),
    Panic {
        payload: &'a (dyn Any + Send),
        location: Option<SourceLocation>,
    },
}

/// A fault as it was detected, before normalisation.
///
/// Build one with [`RawFault::error`], [`RawFault::typed_error`] or
/// [`RawFault::panic`], refine it with the `with_*` methods, then pass it to
/// [`classify`].
pub struct RawFault<'a> {
    source: RawSource<'a>,
    type_name: Option<String>,
    status_code: Option<u16>,
    code: Option<i64>,
    backtrace: Option<Backtrace>,
}

impl<'a> RawFault<'a> {
    /// An error value whose concrete type is unknown.
    pub fn error(error: &'a (dyn StdError + 'static)) -> Self {
        Self {
            source: RawSource::Error(error),
            type_name: None,
            status_code: None,
            code: None,
            backtrace: None,
        }
    }

    /// An error value, recording its concrete type name.
    pub fn typed_error<E: StdError + 'static>(error: &'a E) -> Self {
        Self::error(error).with_type_name(std::any::type_name::<E>())
    }

    /// A panic payload and the location reported by the panic hook.
    pub fn panic(payload: &'a (dyn Any + Send), location: Option<SourceLocation>) -> Self {
        Self {
            source: RawSource::Panic { payload, location },
            type_name: None,
            status_code: None,
            code: None,
            backtrace: None,
        }
    }

    /// Attach the HTTP status the host assigned to this fault.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attach an application-specific error code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Override the type name shown in reports.
    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Use an already captured backtrace instead of capturing one in
    /// [`classify`].
    pub fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = Some(backtrace);
        self
    }
}

/// Normalised, immutable description of a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    kind: FaultKind,
    type_name: String,
    message: String,
    code: Option<i64>,
    location: Option<SourceLocation>,
    status_code: Option<u16>,
    stack_trace: Vec<StackFrame>,
    occurred_at: DateTime<Utc>,
}

impl FaultRecord {
    /// Fault category.
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Error type or panic label.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Human-readable message. Never empty.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error code, when the fault carried one.
    pub fn code(&self) -> Option<i64> {
        self.code
    }

    /// Where the fault was raised, when known.
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// HTTP status, present only for faults raised while handling a request.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Stack trace, innermost frame first. Never empty.
    pub fn stack_trace(&self) -> &[StackFrame] {
        &self.stack_trace
    }

    /// When the fault was classified.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// The stack trace rendered one frame per line.
    pub fn trace_as_string(&self) -> String {
        self.stack_trace
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Normalise a raw fault into a [`FaultRecord`].
pub fn classify(raw: RawFault<'_>) -> FaultRecord {
    let RawFault {
        source,
        type_name,
        status_code,
        code,
        backtrace,
    } = raw;

    let (kind, default_type, message, location, code) = match source {
        RawSource::Error(error) => match error.downcast_ref::<RuntimeFault>() {
            Some(fault) => (
                FaultKind::RuntimeError,
                "RuntimeFault",
                fault.to_string(),
                Some(fault.location().clone()),
                code,
            ),
            None => (
                FaultKind::Exception,
                "Error",
                message_with_sources(error),
                None,
                code.or_else(|| os_error_code(error)),
            ),
        },
        RawSource::Panic { payload, location } => (
            FaultKind::FatalError,
            "panic",
            panic_message(payload),
            location,
            code,
        ),
    };

    let message = if message.trim().is_empty() {
        kind.placeholder_message().to_owned()
    } else {
        message
    };

    let backtrace = backtrace.unwrap_or_else(Backtrace::force_capture);
    let mut stack_trace = parse_backtrace(&backtrace.to_string());
    if stack_trace.is_empty() {
        stack_trace.push(StackFrame {
            index: 0,
            symbol: "<unknown>".to_owned(),
            location: location.clone(),
        });
    }

    FaultRecord {
        kind,
        type_name: type_name.unwrap_or_else(|| default_type.to_owned()),
        message,
        code,
        location,
        status_code,
        stack_trace,
        occurred_at: Utc::now(),
    }
}

/// Extract the text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

fn message_with_sources(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str("\nCaused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn os_error_code(error: &(dyn StdError + 'static)) -> Option<i64> {
    error
        .downcast_ref::<std::io::Error>()
        .and_then(std::io::Error::raw_os_error)
        .map(i64::from)
}

/// Parse the `Display` output of a [`Backtrace`] into frames.
///
/// Frame headers look like `  3: symbol::path` and are optionally followed by
/// an `at file:line:col` line. Anything else (including the text of a
/// disabled or unsupported backtrace) is ignored.
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.location.is_none() {
                    frame.location = parse_frame_location(rest);
                }
            }
            continue;
        }

        let Some((index, symbol)) = trimmed.split_once(": ") else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        frames.push(StackFrame {
            index,
            symbol: symbol.trim().to_owned(),
            location: None,
        });
    }

    frames
}

fn parse_frame_location(text: &str) -> Option<SourceLocation> {
    // file:line[:col], where the file itself may contain ':' on Windows.
    let (rest, last) = text.rsplit_once(':')?;
    let last: u32 = last.parse().ok()?;
    match rest.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => match line.parse() {
            Ok(line) => Some(SourceLocation::new(file, line)),
            Err(_) => Some(SourceLocation::new(rest, last)),
        },
        _ => Some(SourceLocation::new(rest, last)),
    }
}
