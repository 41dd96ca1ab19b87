use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strand_core::config::EngineConfig;
use strand_core::error::StrandError;
use strand_flow::{Flow, FlowBuilder, Registries, Step};
use tokio_util::sync::CancellationToken;

fn init(flow: Flow) -> Flow {
    flow.initialize(EngineConfig::default(), Registries::empty())
        .unwrap();
    flow
}

/// A sub-step that sleeps, then writes `key = value` and `shared = value`.
fn writer(name: &str, key: &'static str, value: &'static str, delay_ms: u64) -> Step {
    Step::custom(name, move |_cancel, ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            ctx.set_string(key, value);
            ctx.set_string("shared", value);
            Ok(())
        })
    })
}

fn failing(name: &str, delay_ms: u64) -> Step {
    Step::custom(name, move |_cancel, _ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Err(StrandError::Step("boom".into()))
        })
    })
}

#[tokio::test(start_paused = true)]
async fn merge_follows_declared_order_not_completion_order() {
    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(writer("slow", "a", "first", 50))
            .sub_step(writer("fast", "b", "second", 1))
            .done()
            .build()
            .unwrap(),
    );

    let ctx = flow
        .execute(&CancellationToken::new(), json!({"seed": 1}))
        .await
        .unwrap();
    assert_eq!(ctx.get_string("a").unwrap(), "first");
    assert_eq!(ctx.get_string("b").unwrap(), "second");
    assert_eq!(ctx.get_string("shared").unwrap(), "second");
    assert_eq!(ctx.get_int("seed").unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn collect_all_reports_every_failure_in_declared_order() {
    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(failing("late", 30))
            .sub_step(writer("ok", "a", "done", 5))
            .sub_step(failing("early", 1))
            .done()
            .build()
            .unwrap(),
    );

    let err = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap_err();
    match err {
        StrandError::ParallelAggregate { step, failures } => {
            assert_eq!(step, "fan");
            assert_eq!(failures.steps(), vec!["late", "early"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failed_children_still_merge_when_step_can_fail() {
    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(writer("a", "a", "x", 5))
            .sub_step(failing("b", 1))
            .sub_step(writer("c", "c", "z", 10))
            .can_fail(true)
            .done()
            .step("after")
            .custom(|_cancel, ctx| {
                Box::pin(async move {
                    ctx.set_bool("after", true);
                    Ok(())
                })
            })
            .done()
            .build()
            .unwrap(),
    );

    let ctx = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap();
    assert_eq!(ctx.get_string("a").unwrap(), "x");
    assert_eq!(ctx.get_string("c").unwrap(), "z");
    assert_eq!(ctx.get_string("shared").unwrap(), "z");
    assert!(ctx.get_bool("after").unwrap());
}

#[tokio::test(start_paused = true)]
async fn fail_fast_stops_launching_siblings() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = |name: &str| {
        let started = Arc::clone(&started);
        Step::custom(name, move |_cancel, _ctx| {
            let started = Arc::clone(&started);
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(failing("first", 1))
            .sub_step(counter("s2"))
            .sub_step(counter("s3"))
            .sub_step(counter("s4"))
            .max_concurrency(1)
            .fail_fast(true)
            .done()
            .build()
            .unwrap(),
    );

    let err = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap_err();
    assert_eq!(started.load(Ordering::SeqCst), 0);
    assert_eq!(err.failed_step(), Some("fan"));
    match err {
        StrandError::StepExecution { source, .. } => {
            assert_eq!(source.failed_step(), Some("first"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn fail_fast_still_joins_launched_siblings() {
    let finished = Arc::new(AtomicUsize::new(0));
    let sub = |name: &str, delay_ms: u64, fail: bool| {
        let finished = Arc::clone(&finished);
        Step::custom(name, move |_cancel, _ctx| {
            let finished = Arc::clone(&finished);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if fail {
                    return Err(StrandError::Step("first failed".into()));
                }
                Ok(())
            })
        })
    };

    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(sub("s1", 0, true))
            .sub_step(sub("s2", 20, false))
            .sub_step(sub("s3", 40, false))
            .fail_fast(true)
            .done()
            .build()
            .unwrap(),
    );

    let err = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap_err();
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    match err.root_cause() {
        StrandError::Step(msg) => assert_eq!(msg, "first failed"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn max_concurrency_bounds_running_sub_steps() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut fan = Vec::new();
    for i in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        fan.push(Step::custom(format!("w{i}"), move |_cancel, _ctx| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        }));
    }

    let flow = init(
        FlowBuilder::new("bounded")
            .add_step(Step::parallel("fan", fan).with_parallel(|p| p.max_concurrency(2)))
            .build()
            .unwrap(),
    );

    flow.execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_sub_step_becomes_a_failure() {
    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(Step::custom("bad", |_cancel, _ctx| {
                Box::pin(async move {
                    let explode = true;
                    if explode {
                        panic!("sub-step exploded");
                    }
                    Ok(())
                })
            }))
            .sub_step(writer("good", "a", "ok", 0))
            .done()
            .build()
            .unwrap(),
    );

    let err = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap_err();
    match err {
        StrandError::ParallelAggregate { failures, .. } => {
            assert_eq!(failures.steps(), vec!["bad"]);
            assert!(failures.to_string().contains("sub-step exploded"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_parallel_step_is_a_no_op() {
    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .done()
            .build()
            .unwrap(),
    );
    let ctx = flow
        .execute(&CancellationToken::new(), json!({"k": "v"}))
        .await
        .unwrap();
    assert_eq!(ctx.get_string("k").unwrap(), "v");
}

#[tokio::test(start_paused = true)]
async fn retried_fan_out_starts_from_a_clean_context() {
    let left_calls = Arc::new(AtomicUsize::new(0));
    let right_calls = Arc::new(AtomicUsize::new(0));

    let left = {
        let calls = Arc::clone(&left_calls);
        Step::custom("left", move |_cancel, ctx| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    ctx.set_string("stale", "first attempt");
                }
                ctx.set_string("left", "done");
                Ok(())
            })
        })
    };
    let right = {
        let calls = Arc::clone(&right_calls);
        Step::custom("right", move |_cancel, ctx| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StrandError::Step("transient".into()));
                }
                ctx.set_string("right", "done");
                Ok(())
            })
        })
    };

    let flow = init(
        FlowBuilder::new("fan")
            .step("fan")
            .parallel()
            .sub_step(left)
            .sub_step(right)
            .retries(1)
            .done()
            .build()
            .unwrap(),
    );

    let ctx = flow
        .execute(&CancellationToken::new(), json!({}))
        .await
        .unwrap();
    assert_eq!(left_calls.load(Ordering::SeqCst), 2);
    assert_eq!(right_calls.load(Ordering::SeqCst), 2);
    assert!(!ctx.has("stale"));
    assert_eq!(ctx.get_string("left").unwrap(), "done");
    assert_eq!(ctx.get_string("right").unwrap(), "done");
}
