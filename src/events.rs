//! Process-wide event bus
//!
//! Lifecycle events are broadcast on a fixed set of topics. Each subscriber
//! owns an independent channel and sees every event published on its topics
//! after it registered; earlier publications are not replayed.
//!
//! ```text
//!   publisher ──► EventBus ──┬──► Subscription A (Shutdown)
//!                            ├──► Subscription B (Shutdown, StreamActive)
//!                            └──► Subscription C (TransmitRequest)
//! ```

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use dashmap::DashMap;

use crate::params::Direction;

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StreamActive,
    TransmitRequest,
    LinkStatus,
    Shutdown,
}

/// What a shutdown applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownScope {
    /// Whole process, e.g. after an interrupt
    All,
    /// A single stream direction after an unrecoverable device failure
    Direction(Direction),
}

impl ShutdownScope {
    pub fn covers(self, direction: Direction) -> bool {
        match self {
            ShutdownScope::All => true,
            ShutdownScope::Direction(d) => d == direction,
        }
    }
}

/// Events, one variant per topic
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A device stream started or stopped
    StreamActive { direction: Direction, active: bool },
    /// Operator asked to start/stop transmitting
    TransmitRequest(bool),
    /// Remote peer link is up/down
    LinkStatus(bool),
    Shutdown(ShutdownScope),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::StreamActive { .. } => Topic::StreamActive,
            Event::TransmitRequest(_) => Topic::TransmitRequest,
            Event::LinkStatus(_) => Topic::LinkStatus,
            Event::Shutdown(_) => Topic::Shutdown,
        }
    }
}

/// Publish/subscribe registry keyed by [`Topic`]
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<DashMap<Topic, Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new receive channel for `topics`
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let (tx, rx) = unbounded();
        for topic in topics {
            self.subscribers.entry(*topic).or_default().push(tx.clone());
        }
        Subscription { rx }
    }

    /// Deliver `event` to every current subscriber of its topic.
    ///
    /// Returns the number of subscribers reached. Subscribers whose
    /// [`Subscription`] was dropped are pruned.
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let Some(mut senders) = self.subscribers.get_mut(&topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }

    /// Number of live subscribers on `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .get(&topic)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }
}

/// Receiving end of a subscription
pub struct Subscription {
    rx: Receiver<Event>,
}

impl Subscription {
    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain pending events and report whether a shutdown covering
    /// `direction` was among them
    pub fn shutdown_requested(&self, direction: Direction) -> bool {
        let mut requested = false;
        while let Some(event) = self.try_recv() {
            if let Event::Shutdown(scope) = event {
                requested |= scope.covers(direction);
            }
        }
        requested
    }

    pub fn receiver(&self) -> &Receiver<Event> {
        &self.rx
    }
}

/// Wait for the first interrupt signal and broadcast a global shutdown.
///
/// Only the first interrupt is translated; the function returns after
/// publishing once.
pub async fn watch_system_events(bus: EventBus) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    bus.publish(Event::Shutdown(ShutdownScope::All));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_only_topic_subscribers() {
        let bus = EventBus::new();
        let shutdown = bus.subscribe(&[Topic::Shutdown]);
        let link = bus.subscribe(&[Topic::LinkStatus]);

        assert_eq!(bus.publish(Event::LinkStatus(true)), 1);
        assert_eq!(link.try_recv(), Some(Event::LinkStatus(true)));
        assert_eq!(shutdown.try_recv(), None);
    }

    #[test]
    fn test_no_replay_before_subscription() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::TransmitRequest(true)), 0);

        let sub = bus.subscribe(&[Topic::TransmitRequest]);
        assert_eq!(sub.try_recv(), None);

        bus.publish(Event::TransmitRequest(false));
        assert_eq!(sub.try_recv(), Some(Event::TransmitRequest(false)));
    }

    #[test]
    fn test_every_subscriber_sees_one_shutdown() {
        let bus = EventBus::new();
        let subs: Vec<_> = (0..5)
            .map(|_| bus.subscribe(&[Topic::Shutdown, Topic::StreamActive]))
            .collect();

        assert_eq!(bus.publish(Event::Shutdown(ShutdownScope::All)), 5);

        for sub in &subs {
            assert_eq!(sub.try_recv(), Some(Event::Shutdown(ShutdownScope::All)));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe(&[Topic::Shutdown]);
        let dropped = bus.subscribe(&[Topic::Shutdown]);
        drop(dropped);

        assert_eq!(bus.publish(Event::Shutdown(ShutdownScope::All)), 1);
        assert_eq!(bus.subscriber_count(Topic::Shutdown), 1);
        assert!(kept.try_recv().is_some());
    }

    #[test]
    fn test_shutdown_scope() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[Topic::Shutdown]);

        bus.publish(Event::Shutdown(ShutdownScope::Direction(Direction::Output)));
        assert!(!sub.shutdown_requested(Direction::Input));

        bus.publish(Event::Shutdown(ShutdownScope::Direction(Direction::Output)));
        assert!(sub.shutdown_requested(Direction::Output));

        bus.publish(Event::Shutdown(ShutdownScope::All));
        assert!(sub.shutdown_requested(Direction::Input));
    }

    #[test]
    fn test_publish_from_other_thread() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[Topic::StreamActive]);

        let publisher = bus.clone();
        std::thread::spawn(move || {
            publisher.publish(Event::StreamActive {
                direction: Direction::Input,
                active: true,
            });
        })
        .join()
        .unwrap();

        assert_eq!(
            sub.recv_timeout(Duration::from_secs(1)),
            Some(Event::StreamActive {
                direction: Direction::Input,
                active: true
            })
        );
    }
}
