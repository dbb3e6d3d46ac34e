//! Field errors, response paths and the per-execution error sink.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::value::Value;

/// Classification of a field error, surfaced to transport collaborators as an
/// error code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
pub enum ErrorKind {
    /// The resolver returned or raised a fault.
    #[display("RESOLVER_ERROR")]
    Resolver,
    /// The raw value did not match the expected type shape.
    #[display("TYPE_SHAPE_ERROR")]
    TypeShape,
    /// A null was produced in a non-null position.
    #[display("NON_NULL_VIOLATION")]
    NonNullViolation,
    /// A batch fetch function violated its key/value contract.
    #[display("BATCH_CONTRACT_VIOLATION")]
    BatchContract,
    /// The task had not completed when the cancellation signal fired.
    #[display("CANCELLED")]
    Cancelled,
}

/// Error type for errors that occur during field resolution.
///
/// Field errors are represented by a human-readable message, a
/// classification, and an optional `Value` structure with additional
/// information for the `"extensions"` field of the rendered error.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    message: String,
    kind: ErrorKind,
    extensions: Value,
}

impl FieldError {
    /// Constructs a new error with the given classification.
    pub fn new<M: fmt::Display>(message: M, kind: ErrorKind) -> Self {
        Self {
            message: message.to_string(),
            kind,
            extensions: Value::Null,
        }
    }

    /// Attaches additional structured information to this error.
    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = extensions;
        self
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Additional structured information, or `Value::Null` if none was
    /// attached.
    pub fn extensions(&self) -> &Value {
        &self.extensions
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self::new(message, ErrorKind::Resolver)
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self::new(message, ErrorKind::Resolver)
    }
}

/// The result of resolving the value of a field of type `T`.
pub type FieldResult<T> = Result<T, FieldError>;

/// One segment of a response path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathSegment {
    /// A response key of an object field.
    Field(String),
    /// An index into a list.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        Self::Field(name.into())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// The response path of the currently executing task, shared between a task
/// and the sub-tasks it spawns.
///
/// Paths form a linked chain towards the root so that deriving a child path
/// never copies the ancestor segments.
#[derive(Debug)]
pub enum ResponsePath {
    /// The root of the response.
    Root,
    /// A field under the given parent path.
    Field(String, Arc<ResponsePath>),
    /// A list index under the given parent path.
    Index(usize, Arc<ResponsePath>),
}

impl ResponsePath {
    /// The root path.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::Root)
    }

    /// Derives the path of a field under `self`.
    pub fn field(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::Field(name.into(), Arc::clone(self)))
    }

    /// Derives the path of a list element under `self`.
    pub fn index(self: &Arc<Self>, index: usize) -> Arc<Self> {
        Arc::new(Self::Index(index, Arc::clone(self)))
    }

    /// Collects the owned segments of this path, root first.
    pub fn to_segments(&self) -> Vec<PathSegment> {
        let mut acc = Vec::new();
        self.construct_path(&mut acc);
        acc
    }

    fn construct_path(&self, acc: &mut Vec<PathSegment>) {
        match self {
            Self::Root => (),
            Self::Field(name, parent) => {
                parent.construct_path(acc);
                acc.push(PathSegment::Field(name.clone()));
            }
            Self::Index(index, parent) => {
                parent.construct_path(acc);
                acc.push(PathSegment::Index(*index));
            }
        }
    }
}

fn fmt_segments(segments: &[PathSegment], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for segment in segments {
        match segment {
            PathSegment::Field(name) => write!(f, "/{name}")?,
            PathSegment::Index(index) => write!(f, "[{index}]")?,
        }
    }
    Ok(())
}

/// Error type for errors that occur during query execution.
///
/// All execution errors contain the response path of the field that failed to
/// resolve, renderable as e.g. `/hero/friends[0]/name`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionError {
    path: Vec<PathSegment>,
    error: FieldError,
}

impl ExecutionError {
    /// Constructs a new error at the given runtime path.
    pub fn new(path: &ResponsePath, error: FieldError) -> Self {
        Self {
            path: path.to_segments(),
            error,
        }
    }

    /// Constructs a new error from owned path segments.
    pub fn at(path: Vec<PathSegment>, error: FieldError) -> Self {
        Self { path, error }
    }

    /// The underlying field error.
    pub fn error(&self) -> &FieldError {
        &self.error
    }

    /// The path of fields leading to the field that generated this error.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at ", self.error.message(), self.error.kind())?;
        fmt_segments(&self.path, f)
    }
}

/// Shared collector of field errors for one execution.
///
/// Errors are kept in the order they were recorded; the final output never
/// drops or reorders them.
#[derive(Clone, Default)]
pub(crate) struct ErrorSink {
    errors: Arc<RwLock<Vec<ExecutionError>>>,
}

impl ErrorSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, path: &ResponsePath, error: FieldError) {
        let mut errors = self.errors.write().unwrap();
        errors.push(ExecutionError::new(path, error));
    }

    pub(crate) fn take(&self) -> Vec<ExecutionError> {
        std::mem::take(&mut *self.errors.write().unwrap())
    }
}
