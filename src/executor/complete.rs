//! Value completion: turning raw resolver output into response values
//! according to the field's type shape.
//!
//! Completion never recovers from a failure itself. A failed branch records
//! exactly one error, at the deepest failing path, and yields
//! [`Completed::Failed`]; the *enclosing* position decides whether the
//! failure becomes a null (nullable position) or propagates further upward
//! (non-null position).

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
};

use futures::{
    channel::oneshot,
    future::{BoxFuture, FutureExt},
    stream::{FuturesOrdered, StreamExt},
};
use tracing::trace;

use crate::{
    error::{ErrorKind, ErrorSink, FieldError, PathSegment, ResponsePath},
    operation::{CompiledSelection, TypeShape},
    resolver::{ExecutionContext, ResolvedValue},
    value::{Object, Value},
};

use super::scheduler::{NewTask, Spawner, TaskKind};

/// The outcome of completing one position of the response.
#[derive(Debug)]
pub(crate) enum Completed {
    Value(Value),
    /// The branch failed; its error is already in the sink.
    Failed,
}

/// A deferred field's handle, merged into the response once its task has
/// run.
pub(crate) struct DeferredField {
    /// Segments of the parent object's path.
    pub(crate) parent: Vec<PathSegment>,
    /// The response key the value lands under.
    pub(crate) key: String,
    /// Whether a failure may be recovered to null at this position.
    pub(crate) non_null: bool,
    pub(crate) receiver: oneshot::Receiver<Completed>,
}

/// Everything a completion task needs, shared across all tasks of one
/// execution.
pub(crate) struct CompletionEnv {
    pub(crate) spawner: Spawner,
    pub(crate) errors: ErrorSink,
    pub(crate) ctx: ExecutionContext,
    pub(crate) deferred: Mutex<Vec<DeferredField>>,
}

/// Spawns the resolve-and-complete task for one field and returns the handle
/// its completed value arrives on.
pub(crate) fn spawn_field(
    env: &Arc<CompletionEnv>,
    selection: &Arc<CompiledSelection>,
    parent: ResolvedValue,
    path: Arc<ResponsePath>,
    serial: bool,
) -> oneshot::Receiver<Completed> {
    let (sender, receiver) = oneshot::channel();
    let spawner = env.spawner.clone();
    let env = Arc::clone(env);
    let selection = Arc::clone(selection);
    let task_path = Arc::clone(&path);
    spawner.spawn(NewTask {
        future: Box::pin(async move {
            let completed = resolve_field(&env, &selection, &parent, &path).await;
            let _ = sender.send(completed);
        }),
        kind: TaskKind::ResolveField,
        serial,
        path: task_path,
    });
    receiver
}

/// Spawns a deferred field's task on the deferred lane and registers its
/// handle for post-drain assembly. The surrounding object does not wait for
/// it.
pub(crate) fn spawn_deferred(
    env: &Arc<CompletionEnv>,
    selection: &Arc<CompiledSelection>,
    parent: ResolvedValue,
    parent_path: &Arc<ResponsePath>,
) {
    let path = parent_path.field(selection.response_key());
    let (sender, receiver) = oneshot::channel();
    {
        let task_env = Arc::clone(env);
        let selection = Arc::clone(selection);
        let task_path = Arc::clone(&path);
        env.spawner.spawn(NewTask {
            future: Box::pin(async move {
                let completed = resolve_field(&task_env, &selection, &parent, &task_path).await;
                let _ = sender.send(completed);
            }),
            kind: TaskKind::DeferredFragment,
            serial: false,
            path: Arc::clone(&path),
        });
    }
    env.deferred.lock().unwrap().push(DeferredField {
        parent: parent_path.to_segments(),
        key: selection.response_key().to_owned(),
        non_null: selection.ty().is_non_null(),
        receiver,
    });
}

/// Invokes the field's resolver and completes its raw value. Resolver
/// errors and panics fail only this field's branch.
async fn resolve_field(
    env: &Arc<CompletionEnv>,
    selection: &Arc<CompiledSelection>,
    parent: &ResolvedValue,
    path: &Arc<ResponsePath>,
) -> Completed {
    if env.ctx.is_cancelled() {
        env.errors.push(
            path,
            FieldError::new("execution was cancelled", ErrorKind::Cancelled),
        );
        return Completed::Failed;
    }

    let resolved = AssertUnwindSafe(
        selection
            .resolver()
            .resolve(parent, selection.arguments(), &env.ctx),
    )
    .catch_unwind()
    .await;

    let raw = match resolved {
        Ok(Ok(raw)) => raw,
        Ok(Err(error)) => {
            trace!(field = selection.name(), "resolver returned an error");
            env.errors.push(path, error);
            return Completed::Failed;
        }
        Err(payload) => {
            env.errors.push(
                path,
                FieldError::new(
                    format!("resolver panicked: {}", panic_message(&*payload)),
                    ErrorKind::Resolver,
                ),
            );
            return Completed::Failed;
        }
    };

    complete_value(env, selection, selection.ty(), raw, path).await
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

/// Completes a raw value against a type shape, in fixed precedence order:
/// the non-null wrapper first, then list, leaf and composite handling.
fn complete_value<'a>(
    env: &'a Arc<CompletionEnv>,
    selection: &'a Arc<CompiledSelection>,
    shape: &'a TypeShape,
    raw: ResolvedValue,
    path: &'a Arc<ResponsePath>,
) -> BoxFuture<'a, Completed> {
    async move {
        match shape {
            TypeShape::NonNull(inner) => {
                match complete_value(env, selection, inner, raw, path).await {
                    Completed::Value(Value::Null) => {
                        env.errors.push(
                            path,
                            FieldError::new(
                                format!(
                                    "cannot return null for non-nullable field `{}`",
                                    selection.name(),
                                ),
                                ErrorKind::NonNullViolation,
                            ),
                        );
                        Completed::Failed
                    }
                    other => other,
                }
            }
            TypeShape::List(inner) => match raw {
                ResolvedValue::Null => Completed::Value(Value::Null),
                ResolvedValue::List(items) => {
                    complete_list(env, selection, inner, items, path).await
                }
                other => {
                    env.errors.push(
                        path,
                        FieldError::new(
                            format!(
                                "expected a list for `{}`, found {}",
                                shape.display_name(),
                                other.shape_name(),
                            ),
                            ErrorKind::TypeShape,
                        ),
                    );
                    Completed::Failed
                }
            },
            TypeShape::Leaf(leaf) => match raw {
                ResolvedValue::Null => Completed::Value(Value::Null),
                raw => match leaf.serialize(&raw) {
                    Ok(scalar) => Completed::Value(Value::scalar(scalar)),
                    Err(message) => {
                        env.errors
                            .push(path, FieldError::new(message, ErrorKind::TypeShape));
                        Completed::Failed
                    }
                },
            },
            TypeShape::Composite(name) => match raw {
                ResolvedValue::Null => Completed::Value(Value::Null),
                raw @ ResolvedValue::Object(_) => {
                    complete_object(env, selection.children(), raw, path).await
                }
                other => {
                    env.errors.push(
                        path,
                        FieldError::new(
                            format!("expected an object for `{name}`, found {}", other.shape_name()),
                            ErrorKind::TypeShape,
                        ),
                    );
                    Completed::Failed
                }
            },
        }
    }
    .boxed()
}

/// Completes every element of a list concurrently, preserving positional
/// order. A failed element nulls its own slot when the element shape is
/// nullable, and fails the whole list otherwise.
async fn complete_list(
    env: &Arc<CompletionEnv>,
    selection: &Arc<CompiledSelection>,
    element_shape: &Arc<TypeShape>,
    items: Vec<ResolvedValue>,
    path: &Arc<ResponsePath>,
) -> Completed {
    let mut slots = FuturesOrdered::new();
    for (index, item) in items.into_iter().enumerate() {
        slots.push_back(spawn_element(
            env,
            selection,
            Arc::clone(element_shape),
            item,
            path.index(index),
        ));
    }

    let element_nullable = !element_shape.is_non_null();
    let mut out = Vec::with_capacity(slots.len());
    while let Some(slot) = slots.next().await {
        match slot {
            Ok(Completed::Value(value)) => out.push(value),
            Ok(Completed::Failed) | Err(_) => {
                if element_nullable {
                    out.push(Value::Null);
                } else {
                    return Completed::Failed;
                }
            }
        }
    }
    Completed::Value(Value::list(out))
}

fn spawn_element(
    env: &Arc<CompletionEnv>,
    selection: &Arc<CompiledSelection>,
    shape: Arc<TypeShape>,
    raw: ResolvedValue,
    path: Arc<ResponsePath>,
) -> oneshot::Receiver<Completed> {
    let (sender, receiver) = oneshot::channel();
    let task_env = Arc::clone(env);
    let selection = Arc::clone(selection);
    let task_path = Arc::clone(&path);
    env.spawner.spawn(NewTask {
        future: Box::pin(async move {
            let completed = complete_value(&task_env, &selection, &shape, raw, &path).await;
            let _ = sender.send(completed);
        }),
        kind: TaskKind::CompleteListElement,
        serial: false,
        path: task_path,
    });
    receiver
}

/// Resolves an object's child selections concurrently and assembles them in
/// declaration order. Deferred children are registered but not awaited.
async fn complete_object(
    env: &Arc<CompletionEnv>,
    children: &[Arc<CompiledSelection>],
    parent: ResolvedValue,
    path: &Arc<ResponsePath>,
) -> Completed {
    let mut pending = Vec::with_capacity(children.len());
    for child in children {
        if child.is_deferred() {
            spawn_deferred(env, child, parent.clone(), path);
            continue;
        }
        let field_path = path.field(child.response_key());
        pending.push((child, spawn_field(env, child, parent.clone(), field_path, false)));
    }

    let mut object = Object::with_capacity(pending.len());
    for (child, receiver) in pending {
        let value = match receiver.await {
            Ok(Completed::Value(value)) => value,
            Ok(Completed::Failed) | Err(_) => {
                if child.ty().is_non_null() {
                    return Completed::Failed;
                }
                Value::Null
            }
        };
        object.add_field(child.response_key(), value);
    }
    Completed::Value(Value::object(object))
}
