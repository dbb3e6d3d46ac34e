//! Compiled operations: the immutable selection tree a type system and
//! parser collaborator hand to the engine.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{
    resolver::{ResolvedValue, Resolver},
    value::{ScalarValue, Value},
};

/// The kind of an operation, deciding root-field scheduling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    /// Root fields may resolve in parallel.
    Query,
    /// Root fields resolve serially, in declaration order.
    Mutation,
    /// One event's selection set; resolves like a query.
    Subscription,
}

type SerializeFn = dyn Fn(&ResolvedValue) -> Result<ScalarValue, String> + Send + Sync;

#[derive(Clone)]
enum LeafKind {
    Int,
    Float,
    String,
    Boolean,
    Id,
    Custom(Arc<SerializeFn>),
}

/// A terminal type requiring only serialization, no further selection.
#[derive(Clone)]
pub struct LeafType {
    name: &'static str,
    kind: LeafKind,
}

impl LeafType {
    /// The built-in `Int` leaf.
    pub fn int() -> Self {
        Self { name: "Int", kind: LeafKind::Int }
    }

    /// The built-in `Float` leaf. Also accepts integer raw values.
    pub fn float() -> Self {
        Self { name: "Float", kind: LeafKind::Float }
    }

    /// The built-in `String` leaf.
    pub fn string() -> Self {
        Self { name: "String", kind: LeafKind::String }
    }

    /// The built-in `Boolean` leaf.
    pub fn boolean() -> Self {
        Self { name: "Boolean", kind: LeafKind::Boolean }
    }

    /// The built-in `ID` leaf: strings and integers serialize as strings.
    pub fn id() -> Self {
        Self { name: "ID", kind: LeafKind::Id }
    }

    /// A custom leaf with its own serializer.
    pub fn custom(
        name: &'static str,
        serialize: impl Fn(&ResolvedValue) -> Result<ScalarValue, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            kind: LeafKind::Custom(Arc::new(serialize)),
        }
    }

    /// The leaf's type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Serializes a raw resolver value as this leaf.
    pub fn serialize(&self, raw: &ResolvedValue) -> Result<ScalarValue, String> {
        let mismatch = || {
            Err(format!(
                "cannot serialize {} as `{}`",
                raw.shape_name(),
                self.name,
            ))
        };
        match (&self.kind, raw) {
            (LeafKind::Custom(serialize), raw) => serialize(raw),
            (kind, ResolvedValue::Scalar(scalar)) => match (kind, scalar) {
                (LeafKind::Int, ScalarValue::Int(v)) => Ok(ScalarValue::Int(*v)),
                (LeafKind::Float, ScalarValue::Float(v)) => Ok(ScalarValue::Float(*v)),
                (LeafKind::Float, ScalarValue::Int(v)) => Ok(ScalarValue::Float(f64::from(*v))),
                (LeafKind::String, ScalarValue::String(v)) => Ok(ScalarValue::String(v.clone())),
                (LeafKind::Boolean, ScalarValue::Boolean(v)) => Ok(ScalarValue::Boolean(*v)),
                (LeafKind::Id, ScalarValue::String(v)) => Ok(ScalarValue::String(v.clone())),
                (LeafKind::Id, ScalarValue::Int(v)) => Ok(ScalarValue::String(v.to_string())),
                _ => mismatch(),
            },
            _ => mismatch(),
        }
    }
}

impl fmt::Debug for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LeafType").field(&self.name).finish()
    }
}

/// The expected shape of a field's value, with nullability and list
/// wrapping.
///
/// A closed union evaluated by the completion pipeline in fixed precedence
/// order: `NonNull` unwraps before `List` and `Leaf` inspect the inner type.
#[derive(Clone, Debug)]
pub enum TypeShape {
    /// A non-null wrapper around an inner shape.
    NonNull(Arc<TypeShape>),
    /// A list of the inner shape.
    List(Arc<TypeShape>),
    /// A scalar leaf.
    Leaf(LeafType),
    /// A composite (object) type with the given name, completed through its
    /// child selections.
    Composite(String),
}

impl TypeShape {
    /// Wraps a shape as non-null.
    pub fn non_null(inner: TypeShape) -> Self {
        Self::NonNull(Arc::new(inner))
    }

    /// Wraps a shape as a list.
    pub fn list(inner: TypeShape) -> Self {
        Self::List(Arc::new(inner))
    }

    /// A composite shape with the given object type name.
    pub fn composite(name: impl Into<String>) -> Self {
        Self::Composite(name.into())
    }

    /// Whether the outermost wrapper is non-null.
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// The wrapped shape if this is non-null, otherwise the shape itself.
    pub fn unwrap_non_null(&self) -> &TypeShape {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// The element shape if this is a list, looking through a non-null
    /// wrapper.
    pub fn list_contents(&self) -> Option<&TypeShape> {
        match self {
            Self::List(inner) => Some(inner),
            Self::NonNull(inner) => inner.list_contents(),
            _ => None,
        }
    }

    /// A display name for diagnostics, e.g. `[String!]!`.
    pub fn display_name(&self) -> String {
        match self {
            Self::NonNull(inner) => format!("{}!", inner.display_name()),
            Self::List(inner) => format!("[{}]", inner.display_name()),
            Self::Leaf(leaf) => leaf.name().into(),
            Self::Composite(name) => name.clone(),
        }
    }
}

/// Pre-coerced argument values for one field, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    values: IndexMap<String, Value>,
}

impl Arguments {
    /// Creates an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument value, consuming and returning the set.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Returns the value of the given argument, if bound.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether no arguments are bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// One immutable node of a compiled selection tree.
///
/// Built once per operation by the parsing/validation collaborators;
/// read-only during execution and shared across concurrent executions of the
/// same operation.
pub struct CompiledSelection {
    name: String,
    alias: Option<String>,
    ty: TypeShape,
    arguments: Arguments,
    resolver: Arc<dyn Resolver>,
    selection_set: Vec<Arc<CompiledSelection>>,
    deferred: bool,
}

impl CompiledSelection {
    /// Creates a selection for the given field.
    pub fn new(name: impl Into<String>, ty: TypeShape, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            ty,
            arguments: Arguments::new(),
            resolver,
            selection_set: Vec::new(),
            deferred: false,
        }
    }

    /// Sets the response alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Sets the argument values.
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Sets the child selections of a composite field.
    pub fn with_children(mut self, children: Vec<Arc<CompiledSelection>>) -> Self {
        self.selection_set = children;
        self
    }

    /// Marks this selection as deferred: it is scheduled only after the
    /// primary selection set has drained.
    pub fn with_deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key this field occupies in the response: its alias, or its name.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// The expected shape of the field's value.
    pub fn ty(&self) -> &TypeShape {
        &self.ty
    }

    /// The pre-coerced argument values.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// The resolver bound to this field.
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// The child selections, empty for leaf fields.
    pub fn children(&self) -> &[Arc<CompiledSelection>] {
        &self.selection_set
    }

    /// Whether this selection is deferred.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }
}

impl fmt::Debug for CompiledSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSelection")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("ty", &self.ty)
            .field("children", &self.selection_set.len())
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

/// A compiled, validated operation ready for execution.
#[derive(Debug)]
pub struct CompiledOperation {
    kind: OperationKind,
    selection_set: Vec<Arc<CompiledSelection>>,
}

impl CompiledOperation {
    /// Creates an operation from its root selections.
    pub fn new(kind: OperationKind, selection_set: Vec<Arc<CompiledSelection>>) -> Self {
        Self {
            kind,
            selection_set,
        }
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The root selections, in declaration order.
    pub fn selection_set(&self) -> &[Arc<CompiledSelection>] {
        &self.selection_set
    }
}
