//! Query execution: scheduling resolver tasks, completing their values and
//! assembling the response.

mod complete;
mod scheduler;

use std::{mem, sync::Arc, sync::Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{ErrorSink, ExecutionError, PathSegment, ResponsePath},
    loader::{BatchScheduler, CachePool, SharedPromiseCache},
    operation::{CompiledOperation, OperationKind},
    resolver::{ExecutionContext, ResolvedValue},
    value::{Object, Value},
};

use self::{
    complete::{spawn_deferred, spawn_field, Completed, CompletionEnv},
    scheduler::{QueueBatchScheduler, SchedulerCore},
};

/// Per-execution configuration.
///
/// The defaults run to completion with a fresh promise cache and the
/// queueing batch policy, which dispatches a loader's accumulated keys only
/// once no resolver work is ready.
#[derive(Default)]
pub struct ExecutionOptions {
    cancellation: CancellationToken,
    cache: Option<SharedPromiseCache>,
    batch_scheduler: Option<Arc<dyn BatchScheduler>>,
}

impl ExecutionOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ties the execution to a cancellation signal. Cancelling stops all
    /// outstanding work; fields already completed stay in the result.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Uses the given promise cache instead of a fresh one, typically a
    /// cache rented from a [`CachePool`] shared across executions.
    pub fn with_cache(mut self, cache: SharedPromiseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the batch dispatch policy.
    pub fn with_batch_scheduler(mut self, scheduler: Arc<dyn BatchScheduler>) -> Self {
        self.batch_scheduler = Some(scheduler);
        self
    }
}

/// The assembled result of one execution: the response data and every field
/// error recorded along the way.
#[derive(Debug)]
pub struct ExecutionOutput {
    data: Value,
    errors: Vec<ExecutionError>,
}

impl ExecutionOutput {
    /// The response data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The recorded field errors, in the order they occurred.
    pub fn errors(&self) -> &[ExecutionError] {
        &self.errors
    }

    /// Whether any field error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Splits the output into its data and errors.
    pub fn into_parts(self) -> (Value, Vec<ExecutionError>) {
        (self.data, self.errors)
    }
}

/// Executes a compiled operation against the given root value.
///
/// Query root fields resolve concurrently; mutation root fields resolve one
/// at a time, in declaration order. The returned output always contains
/// whatever data completed, even when cancelled or partially failed.
pub async fn execute(
    operation: &CompiledOperation,
    root: ResolvedValue,
    options: ExecutionOptions,
) -> ExecutionOutput {
    let errors = ErrorSink::new();
    let core = SchedulerCore::new(&options.cancellation, errors.clone());
    let spawner = core.spawner();

    let cache = options
        .cache
        .unwrap_or_else(|| CachePool::new().rent_shared());
    let batch_scheduler = options
        .batch_scheduler
        .unwrap_or_else(|| Arc::new(QueueBatchScheduler::new(spawner.clone())));
    let ctx = ExecutionContext::new(options.cancellation.clone(), cache, batch_scheduler);

    let env = Arc::new(CompletionEnv {
        spawner,
        errors: errors.clone(),
        ctx,
        deferred: Mutex::new(Vec::new()),
    });

    debug!(
        kind = ?operation.kind(),
        root_fields = operation.selection_set().len(),
        "starting execution"
    );

    let root_path = ResponsePath::root();
    let serial = operation.kind() == OperationKind::Mutation;
    let mut pending = Vec::with_capacity(operation.selection_set().len());
    for selection in operation.selection_set() {
        if selection.is_deferred() {
            spawn_deferred(&env, selection, root.clone(), &root_path);
            continue;
        }
        let field_path = root_path.field(selection.response_key());
        pending.push((
            Arc::clone(selection),
            spawn_field(&env, selection, root.clone(), field_path, serial),
        ));
    }

    core.drain().await;

    let mut object = Object::with_capacity(pending.len());
    let mut poisoned = false;
    for (selection, receiver) in pending {
        let value = match receiver.await {
            Ok(Completed::Value(value)) => value,
            Ok(Completed::Failed) | Err(_) => {
                if selection.ty().is_non_null() {
                    // A failed non-null root field nulls the entire data.
                    poisoned = true;
                    break;
                }
                Value::Null
            }
        };
        object.add_field(selection.response_key(), value);
    }
    let mut data = if poisoned {
        Value::Null
    } else {
        Value::object(object)
    };

    for field in mem::take(&mut *env.deferred.lock().unwrap()) {
        let value = match field.receiver.await {
            Ok(Completed::Value(value)) => value,
            Ok(Completed::Failed) | Err(_) => {
                if field.non_null {
                    // The deferred field cannot be null; null out the
                    // object that contains it instead.
                    if let Some(slot) = navigate(&mut data, &field.parent) {
                        *slot = Value::Null;
                    }
                    continue;
                }
                Value::Null
            }
        };
        if let Some(Value::Object(parent)) = navigate(&mut data, &field.parent) {
            parent.add_field(field.key, value);
        }
    }

    ExecutionOutput {
        data,
        errors: errors.take(),
    }
}

/// Walks the response tree to the value at `path`, or `None` when an
/// ancestor has been nulled away.
fn navigate<'a>(data: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = data;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(object)) => {
                object.get_mut_field_value(name)?
            }
            (PathSegment::Index(index), Value::List(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}
