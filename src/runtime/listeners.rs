//! Caller-side listener helpers.
//!
//! The bridge holds one navigation listener and one progress listener per
//! view. These helpers let an embedding application register several handlers
//! behind that single slot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::local::LocalListener;
use super::ManagedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type NavigationHandler = Arc<dyn Fn(&str) -> Verdict + Send + Sync>;
type ProgressHandler = Arc<dyn Fn(f32) + Send + Sync>;

/// Navigation handlers evaluated in ascending priority.
///
/// Every handler sees the url; the url is allowed only if none denies it.
#[derive(Clone, Default)]
pub struct NavigationChain {
    handlers: Arc<Mutex<BTreeMap<(i32, HandlerId), NavigationHandler>>>,
    next: Arc<AtomicU64>,
}

impl NavigationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, priority: i32, handler: F) -> HandlerId
    where
        F: Fn(&str) -> Verdict + Send + Sync + 'static,
    {
        let id = HandlerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().insert((priority, id), Arc::new(handler));
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let key = handlers.keys().find(|(_, handler)| *handler == id).copied();
        key.and_then(|key| handlers.remove(&key)).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evaluate(&self, url: &str) -> Verdict {
        let handlers: Vec<NavigationHandler> = self.handlers.lock().values().cloned().collect();
        let mut verdict = Verdict::Allowed;
        for handler in handlers {
            if handler(url) == Verdict::Denied {
                verdict = Verdict::Denied;
            }
        }
        verdict
    }

    /// Wraps the chain as a function listener answering with a boolean.
    pub fn into_listener(self) -> LocalListener {
        LocalListener::function(move |value| {
            let url = match &value {
                ManagedValue::Str(url) => url.as_str(),
                _ => "",
            };
            ManagedValue::Bool(self.evaluate(url) == Verdict::Allowed)
        })
    }
}

/// Forwards every progress update to each registered consumer.
#[derive(Clone, Default)]
pub struct ProgressFanout {
    consumers: Arc<Mutex<Vec<ProgressHandler>>>,
}

impl ProgressFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, consumer: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.consumers.lock().push(Arc::new(consumer));
    }

    pub fn publish(&self, progress: f32) {
        let consumers: Vec<ProgressHandler> = self.consumers.lock().clone();
        for consumer in consumers {
            consumer(progress);
        }
    }

    pub fn into_listener(self) -> LocalListener {
        LocalListener::consumer(move |value| {
            if let ManagedValue::Float(progress) = value {
                self.publish(progress);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_allows() {
        assert_eq!(NavigationChain::new().evaluate("https://a.example"), Verdict::Allowed);
    }

    #[test]
    fn runs_in_priority_order_and_any_denial_wins() {
        let chain = NavigationChain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for (priority, verdict) in [(10, Verdict::Allowed), (-5, Verdict::Denied), (0, Verdict::Allowed)] {
            let seen = seen.clone();
            chain.add(priority, move |_| {
                seen.lock().push(priority);
                verdict
            });
        }
        assert_eq!(chain.evaluate("https://a.example"), Verdict::Denied);
        assert_eq!(*seen.lock(), vec![-5, 0, 10]);
    }

    #[test]
    fn removed_handler_no_longer_votes() {
        let chain = NavigationChain::new();
        let deny = chain.add(0, |url| {
            if url.contains("ads") {
                Verdict::Denied
            } else {
                Verdict::Allowed
            }
        });
        assert_eq!(chain.evaluate("https://ads.example"), Verdict::Denied);
        assert!(chain.remove(deny));
        assert!(!chain.remove(deny));
        assert_eq!(chain.evaluate("https://ads.example"), Verdict::Allowed);
        assert!(chain.is_empty());
    }

    #[test]
    fn fanout_reaches_every_consumer() {
        let fanout = ProgressFanout::new();
        let total = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let total = total.clone();
            fanout.subscribe(move |p| total.lock().push(p));
        }
        fanout.publish(0.5);
        assert_eq!(*total.lock(), vec![0.5, 0.5]);
    }
}
