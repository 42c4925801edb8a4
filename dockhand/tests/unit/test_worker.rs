//! Dispatcher and consumer worker over the in-memory queue

use std::time::Duration;

use serde_json::json;

use dockhand::events::model::{Event, Job, RepoEvent};
use dockhand::queue::{JobQueue, STALLED_JOB_MESSAGE};

use crate::common::Harness;

fn clone_event(url: &str) -> Event {
    Event::Repo(RepoEvent::Clone { url: url.into() })
}

#[tokio::test]
async fn test_malformed_payload_fails_and_worker_continues() {
    let mut h = Harness::started("amd64").await;

    let bad = Job {
        id: "app_1".into(),
        payload: json!({"type": "app", "command": "explode", "appid": "jellyfin"}),
        created_at: 0,
    };
    h.queue.enqueue(bad).await.unwrap();

    let result = h
        .queue
        .wait_for_result("app_1", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("no result for malformed job");
    assert!(!result.success);
    assert!(h.runner.calls().is_empty());

    let good = h
        .state
        .dispatcher
        .dispatch_and_wait(&clone_event("https://github.com/example/one"), None)
        .await;
    assert!(good.success, "{}", good.message);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_invalid_event_fails_in_worker() {
    let mut h = Harness::started("amd64").await;
    let result = h
        .state
        .dispatcher
        .dispatch_and_wait(
            &Event::Repo(RepoEvent::Clone {
                url: "not a url".into(),
            }),
            None,
        )
        .await;
    assert!(!result.success);
    assert!(result.message.contains("Invalid repo url"));
    assert!(h.runner.calls().is_empty());

    h.stop_worker().await;
}

#[tokio::test]
async fn test_jobs_run_in_dispatch_order() {
    let mut h = Harness::new("amd64").await;
    let urls = [
        "https://github.com/example/a",
        "https://github.com/example/b",
        "https://github.com/example/c",
    ];

    // Queue everything before the worker starts
    let mut handles = Vec::new();
    for url in urls {
        handles.push(h.state.dispatcher.dispatch(&clone_event(url)).await.unwrap());
    }
    h.start_worker();

    for handle in handles {
        assert!(handle.wait(Duration::from_secs(5)).await.success);
    }

    let cloned: Vec<String> = h
        .runner
        .calls()
        .into_iter()
        .filter(|call| call.get(1).map(String::as_str) == Some("clone"))
        .map(|call| call[2].clone())
        .collect();
    assert_eq!(cloned, urls);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_interrupted_jobs_are_failed_not_retried() {
    let mut h = Harness::new("amd64").await;
    let handle = h
        .state
        .dispatcher
        .dispatch(&clone_event("https://github.com/example/a"))
        .await
        .unwrap();

    // A previous worker took the job and died
    h.queue
        .next_job(Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.queue.active_len(), 1);

    h.start_worker();
    let result = handle.wait(Duration::from_secs(5)).await;
    assert!(!result.success);
    assert_eq!(result.message, STALLED_JOB_MESSAGE);
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.queue.active_len(), 0);

    h.stop_worker().await;
}

#[tokio::test]
async fn test_dispatch_and_wait_times_out_without_worker() {
    let h = Harness::new("amd64").await;
    let result = h
        .state
        .dispatcher
        .dispatch_and_wait(
            &clone_event("https://github.com/example/a"),
            Some(Duration::from_millis(100)),
        )
        .await;
    assert!(!result.success);
    assert_eq!(h.queue.waiting_len(), 1);
}

#[tokio::test]
async fn test_worker_holds_lease_until_shutdown() {
    let mut h = Harness::started("amd64").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !h.state.leadership.is_leader() {
        assert!(tokio::time::Instant::now() < deadline, "lease never acquired");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!h
        .queue
        .try_acquire_lease("worker", "someone-else", Duration::from_secs(5))
        .await
        .unwrap());

    h.stop_worker().await;
    assert!(!h.state.leadership.is_leader());
    assert!(h
        .queue
        .try_acquire_lease("worker", "someone-else", Duration::from_secs(5))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_schedules_replace_on_boot() {
    let h = Harness::new("amd64").await;
    let dispatcher = &h.state.dispatcher;
    let event = Event::Repo(RepoEvent::Update {
        url: "https://github.com/example/a".into(),
    });

    dispatcher.schedule(event.clone(), "*/30 * * * *").await.unwrap();
    dispatcher.schedule(event.clone(), "*/5 * * * *").await.unwrap();
    let schedules = h.queue.list_schedules().await.unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].cron, "*/5 * * * *");

    assert!(dispatcher.schedule(event, "every tuesday").await.is_err());

    assert_eq!(dispatcher.purge_schedules().await.unwrap(), 1);
    assert!(h.queue.list_schedules().await.unwrap().is_empty());
}
