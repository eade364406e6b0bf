use uuid::Uuid;

use ar_bridge::event_bus::Hub;
use ar_bridge::protocol::HubFrame;
use ar_core::types::{Issue, IssueState};

fn test_issue() -> Issue {
    Issue::new(Uuid::new_v4(), "ext-1", "RLP-1", "Add login")
}

#[test]
fn subscribers_receive_serialized_frames_in_order() {
    let hub = Hub::new();
    let sub = hub.subscribe();
    assert_eq!(hub.client_count(), 1);

    let issue = test_issue();
    hub.broadcast(&HubFrame::issue_state_changed(
        &issue,
        IssueState::Queued,
        IssueState::Refining,
    ));
    hub.broadcast(&HubFrame::build_event(&issue, "iteration 1"));

    let first: serde_json::Value =
        serde_json::from_str(&sub.rx.recv().expect("first frame")).expect("valid json");
    assert_eq!(first["type"], "issue_state_changed");
    assert_eq!(first["payload"]["to"], "refining");

    let second: serde_json::Value =
        serde_json::from_str(&sub.rx.recv().expect("second frame")).expect("valid json");
    assert_eq!(second["type"], "build_event");
    assert_eq!(second["payload"]["detail"], "iteration 1");
}

#[test]
fn slow_subscribers_are_evicted_not_waited_on() {
    let hub = Hub::new();
    let _stalled = hub.subscribe();
    let healthy = hub.subscribe();
    assert_eq!(hub.client_count(), 2);

    let issue = test_issue();
    // Overflow the stalled subscriber's bounded queue; the drain below keeps
    // the healthy one alive.
    for n in 0..200 {
        hub.broadcast(&HubFrame::build_event(&issue, &format!("iteration {n}")));
        while healthy.rx.try_recv().is_ok() {}
    }

    assert_eq!(hub.client_count(), 1, "the stalled subscriber was evicted");

    // The healthy subscriber still receives new frames.
    hub.broadcast(&HubFrame::new_issue(&issue));
    assert!(healthy.rx.try_recv().is_ok());
}

#[test]
fn dropped_receivers_are_pruned_on_broadcast() {
    let hub = Hub::new();
    let sub = hub.subscribe();
    drop(sub.rx);

    hub.broadcast(&HubFrame::new_issue(&test_issue()));
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn unsubscribe_is_idempotent() {
    let hub = Hub::new();
    let sub = hub.subscribe();
    hub.unsubscribe(sub.id);
    hub.unsubscribe(sub.id);
    hub.unsubscribe(Uuid::new_v4());
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn concurrent_broadcasters_are_safe() {
    let hub = Hub::new();
    let sub = hub.subscribe();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let hub = hub.clone();
            std::thread::spawn(move || {
                let issue = test_issue();
                for _ in 0..10 {
                    hub.broadcast(&HubFrame::new_issue(&issue));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("broadcaster thread");
    }

    // The queue is bounded at 64; everything beyond evicts — but with 40
    // frames all must arrive.
    let mut received = 0;
    while sub.rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 40);
}
