use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    const_resolver, execute, resolver_fn, CompiledOperation, CompiledSelection, ErrorKind,
    ExecutionOptions, FieldError, LeafType, OperationKind, ResolvedValue, TypeShape,
};

use super::{data_json, run};

fn string_field(name: &str, value: &str) -> Arc<CompiledSelection> {
    Arc::new(CompiledSelection::new(
        name,
        TypeShape::Leaf(LeafType::string()),
        const_resolver(value),
    ))
}

mod scalars {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn resolves_every_root_field() {
        let output = run(
            OperationKind::Query,
            vec![
                string_field("hello", "world"),
                Arc::new(CompiledSelection::new(
                    "answer",
                    TypeShape::Leaf(LeafType::int()),
                    const_resolver(42),
                )),
            ],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(data_json(&output), json!({"hello": "world", "answer": 42}));
    }

    #[tokio::test]
    async fn root_fields_keep_declaration_order() {
        let output = run(
            OperationKind::Query,
            vec![
                string_field("b", "2"),
                string_field("a", "1"),
                string_field("c", "3"),
            ],
        )
        .await;

        let keys: Vec<_> = output
            .data()
            .as_object_value()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn aliases_occupy_their_own_response_keys() {
        let output = run(
            OperationKind::Query,
            vec![
                Arc::new(
                    CompiledSelection::new(
                        "greet",
                        TypeShape::Leaf(LeafType::string()),
                        const_resolver("hi"),
                    )
                    .with_alias("informal"),
                ),
                Arc::new(
                    CompiledSelection::new(
                        "greet",
                        TypeShape::Leaf(LeafType::string()),
                        const_resolver("good day"),
                    )
                    .with_alias("formal"),
                ),
            ],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(
            data_json(&output),
            json!({"informal": "hi", "formal": "good day"}),
        );
    }

    #[tokio::test]
    async fn leaf_type_mismatch_nulls_the_field_and_records_the_shape() {
        let output = run(
            OperationKind::Query,
            vec![Arc::new(CompiledSelection::new(
                "age",
                TypeShape::Leaf(LeafType::int()),
                const_resolver("not a number"),
            ))],
        )
        .await;

        assert_eq!(data_json(&output), json!({"age": null}));
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "cannot serialize String as `Int` (TYPE_SHAPE_ERROR) at /age",
        );
    }
}

mod nullability {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn null_in_non_null_position_propagates_to_nullable_ancestor() {
        let name = Arc::new(CompiledSelection::new(
            "name",
            TypeShape::non_null(TypeShape::Leaf(LeafType::string())),
            const_resolver(ResolvedValue::Null),
        ));
        let hero = Arc::new(
            CompiledSelection::new(
                "hero",
                TypeShape::composite("Hero"),
                const_resolver(ResolvedValue::object(())),
            )
            .with_children(vec![name]),
        );

        let output = run(OperationKind::Query, vec![hero]).await;

        assert_eq!(data_json(&output), json!({"hero": null}));
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "cannot return null for non-nullable field `name` (NON_NULL_VIOLATION) at /hero/name",
        );
    }

    #[tokio::test]
    async fn failed_non_null_root_field_nulls_the_entire_data() {
        let name = Arc::new(CompiledSelection::new(
            "name",
            TypeShape::non_null(TypeShape::Leaf(LeafType::string())),
            const_resolver(ResolvedValue::Null),
        ));
        let hero = Arc::new(
            CompiledSelection::new(
                "hero",
                TypeShape::non_null(TypeShape::composite("Hero")),
                const_resolver(ResolvedValue::object(())),
            )
            .with_children(vec![name]),
        );

        let output = run(
            OperationKind::Query,
            vec![string_field("ok", "fine"), hero],
        )
        .await;

        assert_eq!(data_json(&output), json!(null));
        assert_eq!(output.errors().len(), 1);
        assert_eq!(output.errors()[0].error().kind(), ErrorKind::NonNullViolation);
    }

    #[tokio::test]
    async fn sibling_fields_survive_a_nullable_failure() {
        let flaky = resolver_fn(|_, _, _| {
            async { Err(FieldError::new("database unavailable", ErrorKind::Resolver)) }.boxed()
        });

        let output = run(
            OperationKind::Query,
            vec![
                string_field("left", "ok"),
                Arc::new(CompiledSelection::new(
                    "broken",
                    TypeShape::Leaf(LeafType::string()),
                    flaky,
                )),
                string_field("right", "also ok"),
            ],
        )
        .await;

        assert_eq!(
            data_json(&output),
            json!({"left": "ok", "broken": null, "right": "also ok"}),
        );
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "database unavailable (RESOLVER_ERROR) at /broken",
        );
    }

    #[tokio::test]
    async fn panicking_resolver_fails_only_its_branch() {
        let panicking = resolver_fn(|_, _, _| async { panic!("boom") }.boxed());

        let output = run(
            OperationKind::Query,
            vec![
                string_field("calm", "still here"),
                Arc::new(CompiledSelection::new(
                    "volatile",
                    TypeShape::Leaf(LeafType::string()),
                    panicking,
                )),
            ],
        )
        .await;

        assert_eq!(
            data_json(&output),
            json!({"calm": "still here", "volatile": null}),
        );
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "resolver panicked: boom (RESOLVER_ERROR) at /volatile",
        );
    }
}

mod lists {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn nullable_elements_pass_nulls_through() {
        let numbers = resolver_fn(|_, _, _| {
            async {
                Ok(ResolvedValue::List(vec![
                    ResolvedValue::from(1),
                    ResolvedValue::Null,
                    ResolvedValue::from(3),
                ]))
            }
            .boxed()
        });

        let output = run(
            OperationKind::Query,
            vec![Arc::new(CompiledSelection::new(
                "numbers",
                TypeShape::list(TypeShape::Leaf(LeafType::int())),
                numbers,
            ))],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(data_json(&output), json!({"numbers": [1, null, 3]}));
    }

    #[tokio::test]
    async fn non_null_element_failure_nulls_the_whole_list() {
        let numbers = resolver_fn(|_, _, _| {
            async {
                Ok(ResolvedValue::List(vec![
                    ResolvedValue::from(1),
                    ResolvedValue::Null,
                    ResolvedValue::from(3),
                ]))
            }
            .boxed()
        });

        let output = run(
            OperationKind::Query,
            vec![Arc::new(CompiledSelection::new(
                "numbers",
                TypeShape::list(TypeShape::non_null(TypeShape::Leaf(LeafType::int()))),
                numbers,
            ))],
        )
        .await;

        assert_eq!(data_json(&output), json!({"numbers": null}));
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "cannot return null for non-nullable field `numbers` (NON_NULL_VIOLATION) at /numbers[1]",
        );
    }

    #[tokio::test]
    async fn non_list_raw_value_is_a_shape_error() {
        let output = run(
            OperationKind::Query,
            vec![Arc::new(CompiledSelection::new(
                "numbers",
                TypeShape::list(TypeShape::Leaf(LeafType::int())),
                const_resolver(5),
            ))],
        )
        .await;

        assert_eq!(data_json(&output), json!({"numbers": null}));
        assert_eq!(
            output.errors()[0].to_string(),
            "expected a list for `[Int]`, found Int (TYPE_SHAPE_ERROR) at /numbers",
        );
    }

    #[tokio::test]
    async fn failing_object_element_nulls_only_its_slot() {
        let name = resolver_fn(|parent, _, _| {
            let n = *parent.downcast_ref::<i32>().unwrap_or(&0);
            async move {
                if n == 2 {
                    Err("no name on record".into())
                } else {
                    Ok(ResolvedValue::from(format!("user{n}")))
                }
            }
            .boxed()
        });
        let friends = resolver_fn(|_, _, _| {
            async {
                Ok(ResolvedValue::List(vec![
                    ResolvedValue::object(1),
                    ResolvedValue::object(2),
                    ResolvedValue::object(3),
                ]))
            }
            .boxed()
        });

        let name = Arc::new(CompiledSelection::new(
            "name",
            TypeShape::non_null(TypeShape::Leaf(LeafType::string())),
            name,
        ));
        let output = run(
            OperationKind::Query,
            vec![Arc::new(
                CompiledSelection::new(
                    "friends",
                    TypeShape::list(TypeShape::composite("Friend")),
                    friends,
                )
                .with_children(vec![name]),
            )],
        )
        .await;

        assert_eq!(
            data_json(&output),
            json!({"friends": [{"name": "user1"}, null, {"name": "user3"}]}),
        );
        assert_eq!(output.errors().len(), 1);
        assert_eq!(
            output.errors()[0].to_string(),
            "no name on record (RESOLVER_ERROR) at /friends[1]/name",
        );
    }

    #[tokio::test(start_paused = true)]
    async fn elements_keep_positional_order_whatever_their_completion_order() {
        let name = resolver_fn(|parent, _, _| {
            let n = *parent.downcast_ref::<u64>().unwrap();
            async move {
                tokio::time::sleep(Duration::from_millis(40 - 10 * n)).await;
                Ok(ResolvedValue::from(format!("e{n}")))
            }
            .boxed()
        });
        let items = resolver_fn(|_, _, _| {
            async {
                Ok(ResolvedValue::List(vec![
                    ResolvedValue::object(1_u64),
                    ResolvedValue::object(2_u64),
                    ResolvedValue::object(3_u64),
                ]))
            }
            .boxed()
        });

        let name = Arc::new(CompiledSelection::new(
            "name",
            TypeShape::Leaf(LeafType::string()),
            name,
        ));
        let output = run(
            OperationKind::Query,
            vec![Arc::new(
                CompiledSelection::new("items", TypeShape::list(TypeShape::composite("Item")), items)
                    .with_children(vec![name]),
            )],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(
            data_json(&output),
            json!({"items": [{"name": "e1"}, {"name": "e2"}, {"name": "e3"}]}),
        );
    }
}

mod mutations {
    use pretty_assertions::assert_eq;

    use super::*;

    fn step(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
        delay: u64,
    ) -> Arc<CompiledSelection> {
        let log = Arc::clone(log);
        Arc::new(CompiledSelection::new(
            name,
            TypeShape::Leaf(LeafType::string()),
            resolver_fn(move |_, _, _| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("start {name}"));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(format!("end {name}"));
                    Ok(ResolvedValue::from(name))
                }
                .boxed()
            }),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn root_fields_run_one_at_a_time_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let output = run(
            OperationKind::Mutation,
            vec![step(&log, "first", 30), step(&log, "second", 10)],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(
            *log.lock().unwrap(),
            ["start first", "end first", "start second", "end second"],
        );
        assert_eq!(
            data_json(&output),
            json!({"first": "first", "second": "second"}),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn query_root_fields_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        run(
            OperationKind::Query,
            vec![step(&log, "first", 30), step(&log, "second", 10)],
        )
        .await;

        // Both fields start before either finishes.
        let log = log.lock().unwrap();
        assert!(log[0].starts_with("start"));
        assert!(log[1].starts_with("start"));
    }
}

mod deferred {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tracked(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> CompiledSelection {
        let log = Arc::clone(log);
        CompiledSelection::new(
            name,
            TypeShape::Leaf(LeafType::string()),
            resolver_fn(move |_, _, _| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(name);
                    Ok(ResolvedValue::from(name))
                }
                .boxed()
            }),
        )
    }

    #[tokio::test]
    async fn deferred_root_field_runs_last_and_merges_into_the_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let output = run(
            OperationKind::Query,
            vec![
                Arc::new(tracked(&log, "eager1")),
                Arc::new(tracked(&log, "extra").with_deferred()),
                Arc::new(tracked(&log, "eager2")),
            ],
        )
        .await;

        assert!(!output.has_errors());
        assert_eq!(
            data_json(&output),
            json!({"eager1": "eager1", "eager2": "eager2", "extra": "extra"}),
        );
        assert_eq!(*log.lock().unwrap().last().unwrap(), "extra");
    }

    #[tokio::test]
    async fn deferred_child_merges_into_its_parent_object() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hero = Arc::new(
            CompiledSelection::new(
                "hero",
                TypeShape::composite("Hero"),
                const_resolver(ResolvedValue::object(())),
            )
            .with_children(vec![
                Arc::new(tracked(&log, "name")),
                Arc::new(tracked(&log, "bio").with_deferred()),
            ]),
        );

        let output = run(OperationKind::Query, vec![hero]).await;

        assert!(!output.has_errors());
        assert_eq!(
            data_json(&output),
            json!({"hero": {"name": "name", "bio": "bio"}}),
        );
        assert_eq!(*log.lock().unwrap(), ["name", "bio"]);
    }

    #[tokio::test]
    async fn failed_nullable_deferred_field_merges_as_null() {
        let broken = CompiledSelection::new(
            "broken",
            TypeShape::Leaf(LeafType::string()),
            resolver_fn(|_, _, _| async { Err("late failure".into()) }.boxed()),
        )
        .with_deferred();

        let output = run(
            OperationKind::Query,
            vec![string_field("ok", "fine"), Arc::new(broken)],
        )
        .await;

        assert_eq!(data_json(&output), json!({"ok": "fine", "broken": null}));
        assert_eq!(
            output.errors()[0].to_string(),
            "late failure (RESOLVER_ERROR) at /broken",
        );
    }

    #[tokio::test]
    async fn failed_non_null_deferred_field_nulls_its_containing_object() {
        let bio = CompiledSelection::new(
            "bio",
            TypeShape::non_null(TypeShape::Leaf(LeafType::string())),
            resolver_fn(|_, _, _| async { Err("late failure".into()) }.boxed()),
        )
        .with_deferred();
        let hero = Arc::new(
            CompiledSelection::new(
                "hero",
                TypeShape::composite("Hero"),
                const_resolver(ResolvedValue::object(())),
            )
            .with_children(vec![string_field("name", "R2-D2"), Arc::new(bio)]),
        );

        let output = run(
            OperationKind::Query,
            vec![string_field("ok", "fine"), hero],
        )
        .await;

        // The deferred field cannot merge as null, so the object holding it
        // is nulled instead; the sibling root field survives.
        assert_eq!(data_json(&output), json!({"ok": "fine", "hero": null}));
        assert_eq!(
            output.errors()[0].to_string(),
            "late failure (RESOLVER_ERROR) at /hero/bio",
        );
    }
}

mod cancellation {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keeps_completed_fields_and_reports_the_rest() {
        let stuck = resolver_fn(|_, _, _| {
            async {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            .boxed()
        });
        let operation = CompiledOperation::new(
            OperationKind::Query,
            vec![
                string_field("fast", "done"),
                Arc::new(CompiledSelection::new(
                    "slow",
                    TypeShape::Leaf(LeafType::string()),
                    stuck,
                )),
            ],
        );

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let output = execute(
            &operation,
            ResolvedValue::Null,
            ExecutionOptions::new().with_cancellation(token),
        )
        .await;

        assert_eq!(data_json(&output), json!({"fast": "done", "slow": null}));
        assert_eq!(output.errors().len(), 1);
        assert_eq!(output.errors()[0].error().kind(), ErrorKind::Cancelled);
        assert_eq!(
            output.errors()[0].to_string(),
            "execution was cancelled (CANCELLED) at /slow",
        );
    }

    #[tokio::test]
    async fn already_cancelled_execution_resolves_nothing() {
        let token = CancellationToken::new();
        token.cancel();

        let output = execute(
            &CompiledOperation::new(
                OperationKind::Query,
                vec![string_field("hello", "world")],
            ),
            ResolvedValue::Null,
            ExecutionOptions::new().with_cancellation(token),
        )
        .await;

        assert_eq!(data_json(&output), json!({"hello": null}));
        assert!(output.has_errors());
    }
}
