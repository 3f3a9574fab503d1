//! Latest-value handoff between cores.
//!
//! A [`Bus`] has one publisher and any number of subscribers, each with a
//! one-slot mailbox. Publishing replaces whatever the subscriber hasn't
//! picked up yet, so a slow reader sees the newest value and never a queue
//! of stale ones, and the publisher never blocks.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// A value stamped with the publisher's change counter
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

struct Mailbox<T> {
    tx: Sender<T>,
    // Kept so the publisher can evict an unread value
    evict: Receiver<T>,
}

pub struct Bus<T> {
    mailboxes: Vec<Mailbox<T>>,
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self { mailboxes: vec![] }
    }
}

impl<T: Clone> Bus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscriber<T> {
        let (tx, rx) = bounded(1);
        self.mailboxes.push(Mailbox {
            tx,
            evict: rx.clone(),
        });
        Subscriber { rx, latest: None }
    }

    pub fn publish(&self, value: T) {
        for mailbox in &self.mailboxes {
            match mailbox.tx.try_send(value.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(v)) => {
                    // Only this side ever sends, so after the eviction there's room
                    let _ = mailbox.evict.try_recv();
                    let _ = mailbox.tx.try_send(v);
                }
            }
        }
    }
}

pub struct Subscriber<T> {
    rx: Receiver<T>,
    latest: Option<T>,
}

impl<T> Subscriber<T> {
    /// Pick up anything published since the last poll. True if something new arrived.
    pub fn poll(&mut self) -> bool {
        let mut fresh = false;
        while let Ok(v) = self.rx.try_recv() {
            self.latest = Some(v);
            fresh = true;
        }
        fresh
    }

    pub fn latest(&self) -> Option<&T> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_subscriber_sees_newest() {
        let mut bus = Bus::new();
        let mut sub = bus.subscribe();
        assert!(!sub.poll());
        for v in 0..10 {
            bus.publish(v);
        }
        assert!(sub.poll());
        assert_eq!(sub.latest(), Some(&9));
        assert!(!sub.poll());
        assert_eq!(sub.latest(), Some(&9));
    }

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let mut bus = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Versioned {
            version: 3,
            value: "gain",
        });
        assert!(a.poll() && b.poll());
        assert_eq!(a.latest().unwrap().version, 3);
        assert_eq!(b.latest().unwrap().value, "gain");
    }

    #[test]
    fn test_dropped_subscriber_is_harmless() {
        let mut bus = Bus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(1u8);
        bus.publish(2u8);
    }

    #[test]
    fn test_cross_thread_handoff() {
        let mut bus = Bus::new();
        let mut sub = bus.subscribe();
        let handle = std::thread::spawn(move || {
            for v in 1..=1000u32 {
                bus.publish(v);
            }
        });
        handle.join().unwrap();
        sub.poll();
        assert_eq!(sub.latest(), Some(&1000));
    }
}
