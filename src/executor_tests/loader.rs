use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::{
    resolver_fn, BatchFn, CompiledSelection, DataLoader, ErrorKind, LeafType, LoaderError,
    OperationKind, ResolvedValue, TypeShape,
};

use super::{data_json, run};

struct Upcase {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl BatchFn<String, String> for Upcase {
    async fn load(&self, keys: &[String]) -> Result<Vec<String>, LoaderError> {
        self.calls.lock().unwrap().push(keys.to_vec());
        Ok(keys.iter().map(|k| k.to_uppercase()).collect())
    }
}

fn upcase_loader() -> (Arc<DataLoader<String, String>>, Arc<Mutex<Vec<Vec<String>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(DataLoader::new(Upcase {
        calls: Arc::clone(&calls),
    }));
    (loader, calls)
}

fn loading_field(
    name: &'static str,
    key: &'static str,
    loader: &Arc<DataLoader<String, String>>,
) -> Arc<CompiledSelection> {
    let loader = Arc::clone(loader);
    Arc::new(CompiledSelection::new(
        name,
        TypeShape::Leaf(LeafType::string()),
        resolver_fn(move |_, _, ctx| {
            let loader = Arc::clone(&loader);
            async move {
                let value = loader.load(ctx, key.to_owned()).await?;
                Ok(ResolvedValue::from(value))
            }
            .boxed()
        }),
    ))
}

#[tokio::test]
async fn sibling_fields_share_one_batch() {
    let (loader, calls) = upcase_loader();
    let output = run(
        OperationKind::Query,
        vec![
            loading_field("a", "apple", &loader),
            loading_field("b", "banana", &loader),
        ],
    )
    .await;

    assert!(!output.has_errors());
    assert_eq!(data_json(&output), json!({"a": "APPLE", "b": "BANANA"}));

    // One fetch for the whole tick, keys in first-request order. Ready
    // work runs newest-first, so `b` requests its key before `a` does.
    assert_eq!(*calls.lock().unwrap(), [["banana".to_owned(), "apple".to_owned()]]);
}

#[tokio::test]
async fn same_key_across_fields_fetches_once() {
    let (loader, calls) = upcase_loader();
    let output = run(
        OperationKind::Query,
        vec![
            loading_field("a", "shared", &loader),
            loading_field("b", "shared", &loader),
        ],
    )
    .await;

    assert!(!output.has_errors());
    assert_eq!(data_json(&output), json!({"a": "SHARED", "b": "SHARED"}));
    assert_eq!(*calls.lock().unwrap(), [["shared".to_owned()]]);
}

#[tokio::test]
async fn dependent_loads_form_a_second_batch() {
    let (loader, calls) = upcase_loader();
    let chained = |name: &'static str, key: &'static str| {
        let loader = Arc::clone(&loader);
        Arc::new(CompiledSelection::new(
            name,
            TypeShape::Leaf(LeafType::string()),
            resolver_fn(move |_, _, ctx| {
                let loader = Arc::clone(&loader);
                async move {
                    let first = loader.load(ctx, key.to_owned()).await?;
                    let second = loader.load(ctx, format!("{first}-next")).await?;
                    Ok(ResolvedValue::from(second))
                }
                .boxed()
            }),
        ))
    };

    let output = run(
        OperationKind::Query,
        vec![chained("a", "x"), chained("b", "y")],
    )
    .await;

    assert!(!output.has_errors());
    assert_eq!(data_json(&output), json!({"a": "X-NEXT", "b": "Y-NEXT"}));

    // Both waves coalesce: two fetches total, two keys each.
    let sizes: Vec<_> = calls.lock().unwrap().iter().map(|c| c.len()).collect();
    assert_eq!(sizes, [2, 2]);
}

#[tokio::test]
async fn count_mismatch_fails_every_dependent_field() {
    struct Short;

    #[async_trait]
    impl BatchFn<String, String> for Short {
        async fn load(&self, keys: &[String]) -> Result<Vec<String>, LoaderError> {
            Ok(keys.iter().take(1).cloned().collect())
        }
    }

    let loader = Arc::new(DataLoader::new(Short));
    let field = |name: &'static str, key: &'static str| {
        let loader = Arc::clone(&loader);
        Arc::new(CompiledSelection::new(
            name,
            TypeShape::Leaf(LeafType::string()),
            resolver_fn(move |_, _, ctx| {
                let loader = Arc::clone(&loader);
                async move {
                    let value = loader.load(ctx, key.to_owned()).await?;
                    Ok(ResolvedValue::from(value))
                }
                .boxed()
            }),
        ))
    };

    let output = run(OperationKind::Query, vec![field("a", "x"), field("b", "y")]).await;

    assert_eq!(data_json(&output), json!({"a": null, "b": null}));
    assert_eq!(output.errors().len(), 2);
    for error in output.errors() {
        assert_eq!(error.error().kind(), ErrorKind::BatchContract);
        assert_eq!(
            error.error().message(),
            "batch fetch returned 1 values for 2 keys",
        );
    }
}

#[tokio::test]
async fn serial_mutations_dispatch_their_batches_separately() {
    let (loader, calls) = upcase_loader();
    let output = run(
        OperationKind::Mutation,
        vec![
            loading_field("first", "one", &loader),
            loading_field("second", "two", &loader),
        ],
    )
    .await;

    assert!(!output.has_errors());
    assert_eq!(data_json(&output), json!({"first": "ONE", "second": "TWO"}));
    assert_eq!(
        *calls.lock().unwrap(),
        [vec!["one".to_owned()], vec!["two".to_owned()]],
    );
}
