//! Sorrel is the execution core of a GraphQL server: it takes a compiled,
//! validated operation and drives its resolvers to a complete response.
//!
//! The engine owns three concerns:
//!
//! * **Value completion:** raw resolver output is checked against each
//!   field's type shape; nulls in non-null positions propagate to the
//!   nearest nullable ancestor, recording exactly one error at the failing
//!   path.
//! * **Scheduling:** every field resolution is a cooperative task on a
//!   single-threaded scheduler, with serial mutation root fields, a batch
//!   lane drained at tick boundaries, and deferred fragments promoted once
//!   the primary selection has settled.
//! * **Batched loading:** [`DataLoader`] coalesces the keys requested
//!   within one tick into a single fetch and caches one promise per key for
//!   the execution's lifetime.
//!
//! Parsing, validation and transport are collaborators, not part of this
//! crate: the input is a [`CompiledOperation`] and the output a [`Value`]
//! tree plus the recorded [`ExecutionError`]s.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sorrel::{
//!     const_resolver, execute, CompiledOperation, CompiledSelection, ExecutionOptions,
//!     LeafType, OperationKind, ResolvedValue, TypeShape, Value,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let operation = CompiledOperation::new(
//!     OperationKind::Query,
//!     vec![Arc::new(CompiledSelection::new(
//!         "hello",
//!         TypeShape::Leaf(LeafType::string()),
//!         const_resolver("world"),
//!     ))],
//! );
//!
//! let output = execute(&operation, ResolvedValue::Null, ExecutionOptions::new()).await;
//! assert!(!output.has_errors());
//! assert_eq!(
//!     output.data().as_object_value().unwrap().get_field_value("hello"),
//!     Some(&Value::scalar("world")),
//! );
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod executor;
pub mod loader;
mod operation;
mod resolver;
mod value;

#[cfg(test)]
mod executor_tests;

pub use futures::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;

pub use self::{
    error::{ErrorKind, ExecutionError, FieldError, FieldResult, PathSegment, ResponsePath},
    executor::{execute, ExecutionOptions, ExecutionOutput},
    loader::{
        BatchFn, BatchScheduler, CachePool, DataLoader, Keyed, KeyedBatchFn, LoaderError,
        ManualBatchScheduler,
    },
    operation::{
        Arguments, CompiledOperation, CompiledSelection, LeafType, OperationKind, TypeShape,
    },
    resolver::{const_resolver, resolver_fn, ExecutionContext, ResolvedValue, Resolver},
    value::{Object, ScalarValue, Value},
};
