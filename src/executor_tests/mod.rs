mod executor;
mod loader;

use crate::{
    execute, CompiledOperation, CompiledSelection, ExecutionOptions, ExecutionOutput,
    OperationKind, ResolvedValue,
};
use std::sync::Arc;

async fn run(
    kind: OperationKind,
    selection_set: Vec<Arc<CompiledSelection>>,
) -> ExecutionOutput {
    execute(
        &CompiledOperation::new(kind, selection_set),
        ResolvedValue::Null,
        ExecutionOptions::new(),
    )
    .await
}

fn data_json(output: &ExecutionOutput) -> serde_json::Value {
    serde_json::to_value(output.data()).unwrap()
}
