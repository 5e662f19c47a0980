use factsheet_event_bus::{to_mpsc, EventBus, InMemoryBus};

#[derive(Clone, Debug, PartialEq)]
enum Ping {
    Ready(String),
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped() {
    let bus = InMemoryBus::<Ping>::new(4);
    let delivered = bus.publish(Ping::Ready("a".into())).await;
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn subscribers_receive_published_events() {
    let bus = InMemoryBus::<Ping>::new(4);
    let mut rx = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);

    let delivered = bus.publish(Ping::Ready("key".into())).await;
    assert_eq!(delivered, 1);
    assert_eq!(rx.recv().await, Ping::Ready("key".into()));
}

#[tokio::test]
async fn mpsc_bridge_forwards_events() {
    let bus = InMemoryBus::<Ping>::new(4);
    let mut rx = to_mpsc(bus.clone(), 4);

    bus.publish(Ping::Ready("one".into())).await;
    assert_eq!(rx.recv().await, Some(Ping::Ready("one".into())));
}
