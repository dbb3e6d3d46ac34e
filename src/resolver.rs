//! The resolver invocation contract consumed by the engine.

use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{
    error::FieldResult,
    loader::{BatchScheduler, CachePool, SharedPromiseCache},
    operation::Arguments,
    value::ScalarValue,
};

/// The raw output of a resolver, before value completion.
///
/// Composite values carry an opaque payload that becomes the parent value for
/// the field's child selections; child resolvers downcast it back to the
/// concrete type they expect.
#[derive(Clone)]
pub enum ResolvedValue {
    /// The absence of a value.
    Null,
    /// A scalar, completed through the field's leaf serializer.
    Scalar(ScalarValue),
    /// An enumerable value, completed element-wise against the list's inner
    /// type.
    List(Vec<ResolvedValue>),
    /// A parent value for child selections.
    Object(Arc<dyn Any + Send + Sync>),
}

impl ResolvedValue {
    /// Wraps a concrete value as a composite parent.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    /// Wraps an already shared value as a composite parent.
    pub fn shared_object(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self::Object(value)
    }

    /// Constructs a scalar raw value.
    pub fn scalar<S: Into<ScalarValue>>(s: S) -> Self {
        Self::Scalar(s.into())
    }

    /// Constructs a list raw value.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ResolvedValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Downcasts a composite payload to a concrete parent type.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Self::Object(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The name of this value's shape, for diagnostics.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(s) => s.type_name(),
            Self::List(_) => "a list",
            Self::Object(_) => "an object",
        }
    }
}

impl fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl<S: Into<ScalarValue>> From<S> for ResolvedValue {
    fn from(s: S) -> Self {
        Self::Scalar(s.into())
    }
}

impl<T: Into<ResolvedValue>> From<Option<T>> for ResolvedValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Per-execution state handed to every resolver: the cancellation signal and
/// the data-loading scope.
#[derive(Clone)]
pub struct ExecutionContext {
    cancellation: CancellationToken,
    loader_cache: SharedPromiseCache,
    batch_scheduler: Arc<dyn BatchScheduler>,
}

impl ExecutionContext {
    pub(crate) fn new(
        cancellation: CancellationToken,
        loader_cache: SharedPromiseCache,
        batch_scheduler: Arc<dyn BatchScheduler>,
    ) -> Self {
        Self {
            cancellation,
            loader_cache,
            batch_scheduler,
        }
    }

    /// Creates a context outside of an operation execution, with a fresh
    /// promise cache and the given batch scheduler.
    ///
    /// Useful for driving data loaders standalone, typically together with a
    /// [`ManualBatchScheduler`](crate::loader::ManualBatchScheduler).
    pub fn detached(batch_scheduler: Arc<dyn BatchScheduler>) -> Self {
        Self::new(
            CancellationToken::new(),
            CachePool::new().rent_shared(),
            batch_scheduler,
        )
    }

    /// The cancellation signal for this execution.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The promise cache scoped to this execution.
    pub fn loader_cache(&self) -> &SharedPromiseCache {
        &self.loader_cache
    }

    /// The scheduler deciding when accumulated batches dispatch.
    pub fn batch_scheduler(&self) -> &Arc<dyn BatchScheduler> {
        &self.batch_scheduler
    }
}

/// A field resolver: produces a raw value from the parent value and the
/// field's arguments.
///
/// Resolvers may call into data loaders through the context; the engine
/// catches faults per field, so an `Err` (or a panic) fails only this field's
/// branch.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves the field against `parent`.
    async fn resolve(
        &self,
        parent: &ResolvedValue,
        arguments: &Arguments,
        ctx: &ExecutionContext,
    ) -> FieldResult<ResolvedValue>;
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> Resolver for FnResolver<F>
where
    F: for<'a> Fn(
            &'a ResolvedValue,
            &'a Arguments,
            &'a ExecutionContext,
        ) -> BoxFuture<'a, FieldResult<ResolvedValue>>
        + Send
        + Sync,
{
    async fn resolve(
        &self,
        parent: &ResolvedValue,
        arguments: &Arguments,
        ctx: &ExecutionContext,
    ) -> FieldResult<ResolvedValue> {
        (self.0)(parent, arguments, ctx).await
    }
}

/// Wraps a closure returning a boxed future as a [`Resolver`].
pub fn resolver_fn<F>(f: F) -> Arc<dyn Resolver>
where
    F: for<'a> Fn(
            &'a ResolvedValue,
            &'a Arguments,
            &'a ExecutionContext,
        ) -> BoxFuture<'a, FieldResult<ResolvedValue>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnResolver(f))
}

struct ConstResolver(ResolvedValue);

#[async_trait]
impl Resolver for ConstResolver {
    async fn resolve(
        &self,
        _: &ResolvedValue,
        _: &Arguments,
        _: &ExecutionContext,
    ) -> FieldResult<ResolvedValue> {
        Ok(self.0.clone())
    }
}

/// A resolver that always produces the given raw value.
pub fn const_resolver(value: impl Into<ResolvedValue>) -> Arc<dyn Resolver> {
    Arc::new(ConstResolver(value.into()))
}
