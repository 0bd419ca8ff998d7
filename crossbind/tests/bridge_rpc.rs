//! End-to-end tests: two bridges over a channel pair.
//!
//! All tests run under tokio's paused clock, so bind deadlines are exact and
//! nothing waits on the wall clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crossbind::{
    ApiBuilder, BindConfig, BindError, Bridge, CallError, HandlerError, MemoryChannel,
    NotifyError, RemoteError, Restorable, RestoredValue, TaggedValue, TypeRegistry,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Temperature {
    celsius: f64,
    sensor: String,
}

impl Restorable for Temperature {
    const TAG: &'static str = "Temperature";
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn link() -> (Bridge<MemoryChannel>, Bridge<MemoryChannel>) {
    init_tracing();
    let (main_side, worker_side) = MemoryChannel::pair();
    (Bridge::new(main_side), Bridge::new(worker_side))
}

fn clock_api() -> crossbind::ApiDefinition {
    ApiBuilder::new("Clock")
        .method("now", |_| async { Ok(TaggedValue::plain(json!(1234))) })
        .build()
        .expect("build")
}

#[tokio::test(start_paused = true)]
async fn test_expose_before_bind_resolves_without_waiting() {
    let (main, worker) = link();
    main.expose(clock_api());

    let before = tokio::time::Instant::now();
    let clock = worker.bind("Clock").await.expect("bind");
    assert_eq!(before.elapsed(), Duration::ZERO);

    assert_eq!(clock.name(), "Clock");
    assert_eq!(clock.methods(), ["now"]);
    let now = clock.call("now", &[]).await.expect("call");
    assert_eq!(now.as_plain(), Some(&json!(1234)));
}

#[tokio::test(start_paused = true)]
async fn test_rebinding_returns_the_cached_proxy() {
    let (main_side, worker_side) = MemoryChannel::pair();
    let probe = worker_side.clone();
    let main = Bridge::new(main_side);
    let worker = Bridge::new(worker_side);
    main.expose(clock_api());

    let first = worker.bind("Clock").await.expect("bind");
    let second = worker.bind("Clock").await.expect("rebind");

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(probe.sent_count("crossbind.discover"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bind_to_never_exposed_api_times_out() {
    let (main_side, worker_side) = MemoryChannel::pair();
    let _main = Bridge::new(main_side);
    let worker = Bridge::builder(worker_side)
        .with_config(BindConfig::default().with_bind_timeout(Duration::from_millis(200)))
        .build();

    let err = worker.bind("Ghost").await.expect_err("must time out");
    match err {
        BindError::Timeout { api, waited } => {
            assert_eq!(api, "Ghost");
            assert!(waited >= Duration::from_millis(200));
            assert!(waited < Duration::from_millis(400));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_expose_after_bind_started_still_resolves() {
    let (main, worker) = link();

    let bind = worker.bind("Clock");
    let expose_later = async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        main.expose(clock_api());
    };

    let (bound, ()) = futures::join!(bind, expose_later);
    let clock = bound.expect("bind resolves once exposed");
    let now = clock.call("now", &[]).await.expect("call");
    assert_eq!(now.as_plain(), Some(&json!(1234)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_binds_share_one_discovery_and_one_proxy() {
    let (main_side, worker_side) = MemoryChannel::pair();
    let probe = worker_side.clone();
    let main = Bridge::new(main_side);
    let worker = Bridge::new(worker_side);

    let first = worker.bind("Clock");
    let second = worker.bind("Clock");
    let expose_later = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        main.expose(clock_api());
    };

    let (first, second, ()) = futures::join!(first, second, expose_later);
    let first = first.expect("first bind");
    let second = second.expect("second bind");
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(probe.sent_count("crossbind.discover"), 1);

    // A later rebind hits the cache: no further discovery traffic.
    let third = worker.bind("Clock").await.expect("rebind");
    assert!(Rc::ptr_eq(&first, &third));
    assert_eq!(probe.sent_count("crossbind.discover"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shrinking_the_timeout_applies_to_a_waiting_bind() {
    let (main_side, worker_side) = MemoryChannel::pair();
    let _main = Bridge::new(main_side);
    let worker = Bridge::new(worker_side);
    assert_eq!(worker.bind_timeout(), Duration::from_secs(2));

    let bind = worker.bind("Ghost");
    let shrink_later = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.set_bind_timeout(Duration::from_millis(300));
    };

    let before = tokio::time::Instant::now();
    let (result, ()) = futures::join!(bind, shrink_later);
    assert!(matches!(result, Err(BindError::Timeout { .. })));
    assert!(before.elapsed() < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_relayed_error_carries_message_but_not_trace() {
    let (main, worker) = link();
    main.expose(
        ApiBuilder::new("Vault")
            .method("open", |_| async {
                Err::<TaggedValue, _>(HandlerError::relay_message("boom"))
            })
            .build()
            .expect("build"),
    );

    let vault = worker.bind("Vault").await.expect("bind");
    let err = vault.call("open", &[]).await.expect_err("must relay");
    match err {
        CallError::Relayed(RestoredValue::Error(remote)) => {
            assert_eq!(remote.message, "boom");
            assert_eq!(remote.class_name, "Error");
            assert_eq!(remote.trace, RemoteError::TRACE_MARKER);
        }
        other => panic!("expected relayed error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_thrown_bare_value_arrives_as_the_bare_value() {
    let (main, worker) = link();
    main.expose(
        ApiBuilder::new("Grump")
            .method("poke", |_| async {
                Err::<TaggedValue, _>(HandlerError::relay_value(json!("oops")))
            })
            .build()
            .expect("build"),
    );

    let grump = worker.bind("Grump").await.expect("bind");
    let err = grump.call("poke", &[]).await.expect_err("must relay");
    match err {
        CallError::Relayed(RestoredValue::Plain(value)) => assert_eq!(value, json!("oops")),
        other => panic!("expected relayed plain value, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unrelayed_failure_reaches_the_sink_not_the_caller() {
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();

    let (main_side, worker_side) = MemoryChannel::pair();
    let main = Bridge::builder(main_side)
        .with_diagnostic_sink(move |e| seen_clone.borrow_mut().push(e.to_string()))
        .build();
    let worker = Bridge::new(worker_side);

    main.expose(
        ApiBuilder::new("Db")
            .method("query", |_| async {
                Err::<TaggedValue, _>(HandlerError::Internal(anyhow::anyhow!(
                    "connection string with credentials"
                )))
            })
            .build()
            .expect("build"),
    );

    let db = worker.bind("Db").await.expect("bind");
    let err = db.call("query", &[]).await.expect_err("must fail");

    // The caller learns only that something failed.
    assert!(matches!(err, CallError::RemoteInternal));
    assert_eq!(err.to_string(), "remote side failed internally");

    // The content stayed on the exposing side.
    assert_eq!(
        *seen.borrow(),
        vec!["connection string with credentials".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_typed_values_survive_the_roundtrip() {
    let mut main_recovery = TypeRegistry::new();
    main_recovery.register::<Temperature>();
    let mut worker_recovery = TypeRegistry::new();
    worker_recovery.register::<Temperature>();

    let (main_side, worker_side) = MemoryChannel::pair();
    let main = Bridge::builder(main_side).with_recovery(main_recovery).build();
    let worker = Bridge::builder(worker_side)
        .with_recovery(worker_recovery)
        .build();

    main.expose(
        ApiBuilder::new("Weather")
            .method("warm_up", |args| async move {
                // The argument arrives as the original type, not JSON.
                let reading = args
                    .first()
                    .and_then(|a| a.as_typed())
                    .and_then(|t| t.downcast_ref::<Temperature>())
                    .cloned()
                    .ok_or_else(|| HandlerError::relay_message("expected a Temperature"))?;
                TaggedValue::of(&Temperature {
                    celsius: reading.celsius + 1.0,
                    sensor: reading.sensor,
                })
                .map_err(|e| HandlerError::Internal(e.into()))
            })
            .build()
            .expect("build"),
    );

    let weather = worker.bind("Weather").await.expect("bind");
    let reading = Temperature {
        celsius: 20.0,
        sensor: "attic".to_string(),
    };
    let arg = TaggedValue::of(&reading).expect("serialize");
    let result = weather.call("warm_up", &[arg]).await.expect("call");

    let typed = result.as_typed().expect("reply restores to the original type");
    let warmed = typed.downcast_ref::<Temperature>().expect("downcast");
    assert_eq!(warmed.celsius, 21.0);
    assert_eq!(warmed.sensor, "attic");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_tag_degrades_to_plain_instead_of_failing() {
    // Neither side registers Temperature: the value still crosses, as JSON.
    let (main, worker) = link();
    main.expose(
        ApiBuilder::new("Weather")
            .method("current", |_| async {
                TaggedValue::of(&Temperature {
                    celsius: 3.0,
                    sensor: "roof".to_string(),
                })
                .map_err(|e| HandlerError::Internal(e.into()))
            })
            .build()
            .expect("build"),
    );

    let weather = worker.bind("Weather").await.expect("bind");
    let result = weather.call("current", &[]).await.expect("call");
    assert_eq!(
        result.as_plain(),
        Some(&json!({"celsius": 3.0, "sensor": "roof"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_notifications_are_restored_like_call_arguments() {
    let (main, worker) = link();

    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    main.subscribe("Status", "changed", move |args| {
        for arg in args {
            if let RestoredValue::Plain(v) = arg {
                seen_clone.borrow_mut().push(v);
            }
        }
    });

    let status = worker.notifier("Status");
    status
        .notify("changed", &[TaggedValue::plain(json!("ready"))])
        .expect("notify");
    status
        .notify("changed", &[TaggedValue::plain(json!({"progress": 80}))])
        .expect("notify");

    assert_eq!(*seen.borrow(), vec![json!("ready"), json!({"progress": 80})]);
}

#[tokio::test(start_paused = true)]
async fn test_notify_after_teardown_fails_immediately() {
    let (main_side, worker_side) = MemoryChannel::pair();
    let main_probe = main_side.clone();
    let _main = Bridge::new(main_side);
    let worker = Bridge::new(worker_side);

    main_probe.close();
    let err = worker
        .notifier("Status")
        .notify("changed", &[])
        .expect_err("destroyed");
    assert!(matches!(err, NotifyError::TargetDestroyed));
}

#[tokio::test(start_paused = true)]
async fn test_both_sides_can_expose_and_bind() {
    let (main, worker) = link();
    main.expose(clock_api());
    worker.expose(
        ApiBuilder::new("Jobs")
            .method("count", |_| async { Ok(TaggedValue::plain(json!(3))) })
            .build()
            .expect("build"),
    );

    let clock = worker.bind("Clock").await.expect("bind clock");
    let jobs = main.bind("Jobs").await.expect("bind jobs");

    assert_eq!(
        clock.call("now", &[]).await.expect("call").as_plain(),
        Some(&json!(1234))
    );
    assert_eq!(
        jobs.call("count", &[]).await.expect("call").as_plain(),
        Some(&json!(3))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_method_is_rejected_locally() {
    let (main, worker) = link();
    main.expose(clock_api());

    let clock = worker.bind("Clock").await.expect("bind");
    let err = clock.call("tomorrow", &[]).await.expect_err("unknown");
    match err {
        CallError::UnknownMethod { api, method } => {
            assert_eq!(api, "Clock");
            assert_eq!(method, "tomorrow");
        }
        other => panic!("expected unknown method, got {other}"),
    }
}
