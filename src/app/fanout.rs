// LogRelay - app/fanout.rs
//
// Distribution hub: routes parsed records to subscribers.
//
// Each subscriber is an mpsc channel of `ServerEvent` plus its routing state:
// the set of domains it joined and whether it is on the all-domains feed.
// A subscriber's receiving half lives with the transport (one thread per
// connection); the hub only ever holds senders.
//
// Domain announcements are remembered in `announced` and replayed inside
// `connect` while the hub lock is held. Because `announce` takes the same
// lock, a subscriber receives each `domain_discovered` exactly once: either
// in the replay or live, never both, never neither.
//
// Records are not retained after delivery. Each subscriber channel is bounded
// (SUBSCRIBER_QUEUE_CAPACITY events). A send to a closed channel, or to a
// full one whose reader has fallen that far behind, marks the subscriber
// dead and it is pruned before the lock is released. Dropping the sender
// ends the transport's writer, which then closes the connection.

use crate::core::model::{Record, ServerEvent};
use crate::util::constants::{
    DIRECT_DELIVERY_RETRY_MS, DIRECT_DELIVERY_TIMEOUT_MS, SUBSCRIBER_QUEUE_CAPACITY,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Identifies one connected subscriber.
pub type SubscriberId = u64;

/// The receiving side handed to a newly connected subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently connected subscribers.
    pub subscribers: usize,
    /// Records handed to `publish` since startup.
    pub published: u64,
    /// Individual events successfully queued to subscriber channels.
    pub delivered: u64,
    /// Subscribers dropped because their queue was full.
    pub evicted: u64,
}

/// Why a subscriber is being removed by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Closed,
    Lagging,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::SyncSender<ServerEvent>,
    domains: HashSet<String>,
    all_feed: bool,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: SubscriberId,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    announced: BTreeSet<String>,
}

fn offer(tx: &mpsc::SyncSender<ServerEvent>, event: ServerEvent) -> Result<(), Eviction> {
    tx.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => Eviction::Lagging,
        TrySendError::Disconnected(_) => Eviction::Closed,
    })
}

/// Fan-out of records and domain announcements to connected subscribers.
#[derive(Debug)]
pub struct Hub {
    inner: Mutex<HubInner>,
    queue_capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

impl Default for Hub {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub whose subscriber queues hold at most `queue_capacity` events
    /// (plus the domain replay queued on connect).
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            queue_capacity: queue_capacity.max(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    ///
    /// Every domain announced so far is queued to the new channel before this
    /// returns. The subscriber starts on the all-domains feed and with no
    /// domain subscriptions.
    pub fn connect(&self) -> Subscription {
        let mut inner = self.lock();
        // Room for the full replay on top of the live queue.
        let (tx, rx) = mpsc::sync_channel(self.queue_capacity + inner.announced.len());

        let id = inner.next_id;
        inner.next_id += 1;

        let mut replayed = 0u64;
        for domain in &inner.announced {
            let event = ServerEvent::DomainDiscovered {
                domain: domain.clone(),
            };
            if offer(&tx, event).is_ok() {
                replayed += 1;
            }
        }
        self.delivered.fetch_add(replayed, Ordering::Relaxed);

        inner.subscribers.insert(
            id,
            Subscriber {
                tx,
                domains: HashSet::new(),
                all_feed: true,
            },
        );

        tracing::debug!(
            subscriber = id,
            replayed_domains = replayed,
            "Subscriber connected"
        );
        Subscription { id, events: rx }
    }

    /// Remove a subscriber. Returns false if it was not connected.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "Subscriber disconnected");
        }
        removed
    }

    /// Join a domain's live feed. Unknown domains are accepted: the
    /// subscription takes effect once a file for the domain appears.
    pub fn subscribe(&self, id: SubscriberId, domain: &str) -> bool {
        match self.lock().subscribers.get_mut(&id) {
            Some(sub) => {
                sub.domains.insert(domain.to_string());
                tracing::debug!(subscriber = id, domain, "Joined domain feed");
                true
            }
            None => false,
        }
    }

    /// Leave a domain's live feed.
    pub fn unsubscribe(&self, id: SubscriberId, domain: &str) -> bool {
        match self.lock().subscribers.get_mut(&id) {
            Some(sub) => {
                sub.domains.remove(domain);
                tracing::debug!(subscriber = id, domain, "Left domain feed");
                true
            }
            None => false,
        }
    }

    /// Join or leave the all-domains feed.
    pub fn set_all_feed(&self, id: SubscriberId, enabled: bool) -> bool {
        match self.lock().subscribers.get_mut(&id) {
            Some(sub) => {
                sub.all_feed = enabled;
                true
            }
            None => false,
        }
    }

    /// Deliver one record to the domain's subscribers and to the all-domains
    /// feed.
    pub fn publish(&self, domain: &str, record: Arc<Record>) {
        self.publish_batch(domain, vec![record]);
    }

    /// Deliver a batch of records from one file, preserving their order.
    ///
    /// The whole batch is routed under a single lock acquisition so batches
    /// from different files are never interleaved for one subscriber.
    pub fn publish_batch(&self, domain: &str, records: Vec<Arc<Record>>) {
        if records.is_empty() {
            return;
        }
        self.published
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        let mut inner = self.lock();
        let mut dead = Vec::new();
        let mut delivered = 0u64;

        for (&id, sub) in &inner.subscribers {
            let joined = sub.domains.contains(domain);
            if !joined && !sub.all_feed {
                continue;
            }
            for record in &records {
                if joined {
                    let event = ServerEvent::Record {
                        domain: domain.to_string(),
                        entry: Arc::clone(record),
                    };
                    if let Err(why) = offer(&sub.tx, event) {
                        dead.push((id, why));
                        break;
                    }
                    delivered += 1;
                }
                if sub.all_feed {
                    let event = ServerEvent::RecordAny {
                        domain: domain.to_string(),
                        entry: Arc::clone(record),
                    };
                    if let Err(why) = offer(&sub.tx, event) {
                        dead.push((id, why));
                        break;
                    }
                    delivered += 1;
                }
            }
        }

        self.prune(&mut inner, &dead);
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
    }

    /// Announce a domain to every current subscriber and remember it for
    /// future ones. Returns false if the domain was already announced.
    pub fn announce(&self, domain: &str) -> bool {
        let mut inner = self.lock();
        if !inner.announced.insert(domain.to_string()) {
            return false;
        }

        let mut dead = Vec::new();
        let mut delivered = 0u64;
        for (&id, sub) in &inner.subscribers {
            let event = ServerEvent::DomainDiscovered {
                domain: domain.to_string(),
            };
            match offer(&sub.tx, event) {
                Ok(()) => delivered += 1,
                Err(why) => dead.push((id, why)),
            }
        }
        self.prune(&mut inner, &dead);
        self.delivered.fetch_add(delivered, Ordering::Relaxed);

        tracing::info!(domain, subscribers = delivered, "Domain announced");
        true
    }

    /// Queue events to one subscriber only (history replies).
    /// Returns false if the subscriber is gone or had to be dropped.
    ///
    /// Runs on the requester's own thread. When the queue is full it waits
    /// for room, without holding the hub lock, for up to
    /// DIRECT_DELIVERY_TIMEOUT_MS; a reply longer than the queue therefore
    /// streams out as the subscriber reads it. Live records published
    /// meanwhile may interleave with the reply.
    pub fn deliver_to(&self, id: SubscriberId, events: Vec<ServerEvent>) -> bool {
        let Some(tx) = self.lock().subscribers.get(&id).map(|s| s.tx.clone()) else {
            return false;
        };

        let deadline = Instant::now() + Duration::from_millis(DIRECT_DELIVERY_TIMEOUT_MS);
        let retry = Duration::from_millis(DIRECT_DELIVERY_RETRY_MS);
        let mut delivered = 0u64;
        let mut failure = None;
        'events: for event in events {
            let mut pending = event;
            loop {
                match tx.try_send(pending) {
                    Ok(()) => {
                        delivered += 1;
                        continue 'events;
                    }
                    Err(TrySendError::Full(back)) if Instant::now() < deadline => {
                        pending = back;
                        std::thread::sleep(retry);
                    }
                    Err(TrySendError::Full(_)) => {
                        failure = Some(Eviction::Lagging);
                        break 'events;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        failure = Some(Eviction::Closed);
                        break 'events;
                    }
                }
            }
        }
        self.delivered.fetch_add(delivered, Ordering::Relaxed);

        match failure {
            Some(why) => {
                let mut inner = self.lock();
                self.prune(&mut inner, &[(id, why)]);
                false
            }
            None => true,
        }
    }

    /// Domains announced so far, sorted.
    pub fn announced(&self) -> Vec<String> {
        self.lock().announced.iter().cloned().collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.lock().subscribers.len(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn prune(&self, inner: &mut HubInner, dead: &[(SubscriberId, Eviction)]) {
        for &(id, why) in dead {
            if inner.subscribers.remove(&id).is_none() {
                continue;
            }
            match why {
                Eviction::Closed => {
                    tracing::debug!(subscriber = id, "Pruned subscriber with closed channel")
                }
                Eviction::Lagging => {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = id,
                        capacity = self.queue_capacity,
                        "Evicting subscriber that stopped reading; its queue is full"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16) -> Arc<Record> {
        Arc::new(serde_json::from_value(serde_json::json!({ "status": status })).unwrap())
    }

    fn drain(sub: &Subscription) -> Vec<ServerEvent> {
        sub.events.try_iter().collect()
    }

    #[test]
    fn test_connect_replays_announced_domains_once() {
        let hub = Hub::new();
        assert!(hub.announce("a.com"));
        assert!(!hub.announce("a.com"));

        let sub = hub.connect();
        hub.announce("b.com");

        let events = drain(&sub);
        assert_eq!(
            events,
            vec![
                ServerEvent::DomainDiscovered {
                    domain: "a.com".to_string()
                },
                ServerEvent::DomainDiscovered {
                    domain: "b.com".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_domain_subscriber_gets_record_and_feed() {
        let hub = Hub::new();
        let sub = hub.connect();
        hub.subscribe(sub.id, "a.com");

        hub.publish("a.com", record(200));
        let events = drain(&sub);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ServerEvent::Record { domain, .. } if domain == "a.com"));
        assert!(matches!(&events[1], ServerEvent::RecordAny { domain, .. } if domain == "a.com"));
    }

    #[test]
    fn test_other_domains_only_reach_feed() {
        let hub = Hub::new();
        let sub = hub.connect();
        hub.subscribe(sub.id, "a.com");
        hub.set_all_feed(sub.id, false);

        hub.publish("b.com", record(200));
        assert!(drain(&sub).is_empty());

        hub.unsubscribe(sub.id, "a.com");
        hub.publish("a.com", record(200));
        assert!(drain(&sub).is_empty());
    }

    #[test]
    fn test_batch_order_is_preserved() {
        let hub = Hub::new();
        let sub = hub.connect();
        hub.publish_batch("a.com", vec![record(200), record(201), record(202)]);

        let statuses: Vec<u16> = drain(&sub)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::RecordAny { entry, .. } => entry.status(),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![200, 201, 202]);
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let hub = Hub::new();
        let sub = hub.connect();
        let keep = hub.connect();
        drop(sub);

        hub.publish("a.com", record(200));
        let stats = hub.stats();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(drain(&keep).len(), 1);
    }

    #[test]
    fn test_stalled_subscriber_is_evicted_not_buffered() {
        let hub = Hub::with_capacity(4);
        let stalled = hub.connect();
        let reader = hub.connect();

        for status in 0..4 {
            hub.publish("a.com", record(200 + status));
            assert_eq!(drain(&reader).len(), 1);
        }
        assert_eq!(hub.stats().subscribers, 2);

        hub.publish("a.com", record(299));
        let stats = hub.stats();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.evicted, 1);
        assert_eq!(drain(&reader).len(), 1);

        // The evicted subscriber keeps what was queued, then sees the end.
        assert_eq!(drain(&stalled).len(), 4);
        assert!(matches!(
            stalled.events.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
        assert!(!hub.subscribe(stalled.id, "a.com"));
    }

    #[test]
    fn test_history_reply_longer_than_queue_streams_to_reader() {
        let hub = Arc::new(Hub::with_capacity(2));
        let sub = hub.connect();

        let reader = std::thread::spawn(move || {
            let mut got = 0;
            while let Ok(ServerEvent::Record { .. }) =
                sub.events.recv_timeout(Duration::from_secs(5))
            {
                got += 1;
                if got == 10 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            got
        });

        let events = (0..10)
            .map(|n| ServerEvent::Record {
                domain: "a.com".to_string(),
                entry: record(200 + n),
            })
            .collect();
        assert!(hub.deliver_to(0, events));
        assert_eq!(reader.join().unwrap(), 10);
        assert_eq!(hub.stats().evicted, 0);
    }

    #[test]
    fn test_replay_fits_even_with_small_queue() {
        let hub = Hub::with_capacity(1);
        for domain in ["a.com", "b.com", "c.com"] {
            hub.announce(domain);
        }
        let sub = hub.connect();
        assert_eq!(drain(&sub).len(), 3);
        assert_eq!(hub.stats().subscribers, 1);
    }

    #[test]
    fn test_deliver_to_targets_one_subscriber() {
        let hub = Hub::new();
        let a = hub.connect();
        let b = hub.connect();

        let sent = hub.deliver_to(
            a.id,
            vec![ServerEvent::Record {
                domain: "a.com".to_string(),
                entry: record(304),
            }],
        );
        assert!(sent);
        assert_eq!(drain(&a).len(), 1);
        assert!(drain(&b).is_empty());

        assert!(hub.disconnect(b.id));
        assert!(!hub.deliver_to(b.id, Vec::new()));
        assert!(!hub.subscribe(b.id, "a.com"));
    }
}
