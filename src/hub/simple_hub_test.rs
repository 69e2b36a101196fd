use super::*;
use crate::Change;

#[tokio::test]
async fn publish_reaches_matching_subscribers_only() {
    let hub = SimpleHub::new();
    let mut all = hub.subscribe(match_all());
    let mut restarts = hub.subscribe(Box::new(|topic| topic == TXN_WATCHER_RESTARTED));

    assert_eq!(hub.publish_change(Change::new("machines", "m-0", 1)), 1);
    assert_eq!(hub.publish_restarted(), 2);

    let first = all.recv().await.unwrap();
    assert_eq!(first.topic, TXN_WATCHER_COLLECTION);
    assert_eq!(first.payload, Payload::Change(Change::new("machines", "m-0", 1)));

    let second = all.recv().await.unwrap();
    assert_eq!(second.topic, TXN_WATCHER_RESTARTED);
    assert_eq!(second.payload, Payload::Empty);

    let only = restarts.recv().await.unwrap();
    assert_eq!(only.topic, TXN_WATCHER_RESTARTED);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let hub = SimpleHub::new();
    let mut subscription = hub.subscribe(match_all());
    assert_eq!(hub.subscriber_count(), 1);

    subscription.unsubscribe();
    subscription.unsubscribe();

    assert!(!subscription.is_subscribed());
    assert_eq!(hub.subscriber_count(), 0);
    assert_eq!(hub.publish_restarted(), 0);
    assert!(subscription.recv().await.is_none());
}

#[test]
fn dropping_subscription_unsubscribes() {
    let hub = SimpleHub::new();
    {
        let _subscription = hub.subscribe(match_all());
        let _other = hub.clone().subscribe(match_all());
        assert_eq!(hub.subscriber_count(), 2);
    }
    assert_eq!(hub.subscriber_count(), 0);
}

#[test]
fn subscription_outliving_hub_drops_cleanly() {
    let hub = SimpleHub::new();
    let subscription = hub.subscribe(match_all());

    drop(hub);
    drop(subscription);
}

#[test]
fn payload_kind_names() {
    assert_eq!(Payload::Empty.kind(), "empty");
    assert_eq!(Payload::Change(Change::removed("machines", "m-0")).kind(), "change");
    assert_eq!(Payload::Raw(vec![1, 2]).kind(), "raw");
}
