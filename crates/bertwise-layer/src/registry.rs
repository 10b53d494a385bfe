use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bertwise_core::error::{Result, TransferErrorKind};

use crate::{block1::Block1Status, block2::Block2Status, key::TransferKey};

/// Concurrent mapping from transfer keys to live transfer trackers.
///
/// One Block1 and one Block2 tracker may exist per key at any instant;
/// map operations are atomic and individual trackers carry their own
/// monitor. Trackers that idle past the configured lifetime are removed by
/// [`TransferRegistry::cleanup_expired`], which the embedding host drives
/// from its periodic tick.
pub struct TransferRegistry {
    block1: Mutex<HashMap<TransferKey, Arc<Mutex<Block1Status>>>>,
    block2: Mutex<HashMap<TransferKey, Arc<Mutex<Block2Status>>>>,
    lifetime: Duration,
    max_entries: usize,
}

impl TransferRegistry {
    /// Creates a registry with the given idle lifetime and per-direction
    /// entry cap.
    pub fn new(lifetime: Duration, max_entries: usize) -> Self {
        Self {
            block1: Mutex::new(HashMap::new()),
            block2: Mutex::new(HashMap::new()),
            lifetime,
            max_entries,
        }
    }

    /// Looks up the Block1 tracker for `key`.
    pub fn block1(&self, key: &TransferKey) -> Option<Arc<Mutex<Block1Status>>> {
        self.block1.lock().expect("registry lock poisoned").get(key).cloned()
    }

    /// Looks up the Block2 tracker for `key`.
    pub fn block2(&self, key: &TransferKey) -> Option<Arc<Mutex<Block2Status>>> {
        self.block2.lock().expect("registry lock poisoned").get(key).cloned()
    }

    /// Returns the Block1 tracker for `key`, creating it with `create`
    /// when absent. Fails when the registry is full.
    pub fn get_or_create_block1(
        &self,
        key: &TransferKey,
        create: impl FnOnce() -> Block1Status,
    ) -> Result<Arc<Mutex<Block1Status>>> {
        let mut map = self.block1.lock().expect("registry lock poisoned");
        if let Some(status) = map.get(key) {
            return Ok(status.clone());
        }
        if map.len() >= self.max_entries {
            return Err(TransferErrorKind::RegistryFull.into());
        }
        let status = Arc::new(Mutex::new(create()));
        map.insert(key.clone(), status.clone());
        Ok(status)
    }

    /// Returns the Block2 tracker for `key`, creating it with `create`
    /// when absent. Fails when the registry is full.
    pub fn get_or_create_block2(
        &self,
        key: &TransferKey,
        create: impl FnOnce() -> Block2Status,
    ) -> Result<Arc<Mutex<Block2Status>>> {
        let mut map = self.block2.lock().expect("registry lock poisoned");
        if let Some(status) = map.get(key) {
            return Ok(status.clone());
        }
        if map.len() >= self.max_entries {
            return Err(TransferErrorKind::RegistryFull.into());
        }
        let status = Arc::new(Mutex::new(create()));
        map.insert(key.clone(), status.clone());
        Ok(status)
    }

    /// Installs a fresh Block1 tracker for `key`, replacing any existing
    /// one. Used when a peer restarts an upload from block zero.
    pub fn reset_block1(
        &self,
        key: &TransferKey,
        status: Block1Status,
    ) -> Result<Arc<Mutex<Block1Status>>> {
        let mut map = self.block1.lock().expect("registry lock poisoned");
        if !map.contains_key(key) && map.len() >= self.max_entries {
            return Err(TransferErrorKind::RegistryFull.into());
        }
        let status = Arc::new(Mutex::new(status));
        map.insert(key.clone(), status.clone());
        Ok(status)
    }

    /// Installs a fresh Block2 tracker for `key`, replacing any existing
    /// one.
    pub fn reset_block2(
        &self,
        key: &TransferKey,
        status: Block2Status,
    ) -> Result<Arc<Mutex<Block2Status>>> {
        let mut map = self.block2.lock().expect("registry lock poisoned");
        if !map.contains_key(key) && map.len() >= self.max_entries {
            return Err(TransferErrorKind::RegistryFull.into());
        }
        let status = Arc::new(Mutex::new(status));
        map.insert(key.clone(), status.clone());
        Ok(status)
    }

    /// Removes and returns the Block1 tracker for `key`.
    pub fn remove_block1(&self, key: &TransferKey) -> Option<Arc<Mutex<Block1Status>>> {
        self.block1.lock().expect("registry lock poisoned").remove(key)
    }

    /// Removes and returns the Block2 tracker for `key`.
    pub fn remove_block2(&self, key: &TransferKey) -> Option<Arc<Mutex<Block2Status>>> {
        self.block2.lock().expect("registry lock poisoned").remove(key)
    }

    /// Removes the Block1 entry for `key` only if it still is `status`.
    /// Returns whether an entry was removed. Protects a newer transfer on
    /// the same key from being torn down by a stale cleanup.
    pub fn remove_block1_if(
        &self,
        key: &TransferKey,
        status: &Arc<Mutex<Block1Status>>,
    ) -> bool {
        let mut map = self.block1.lock().expect("registry lock poisoned");
        match map.get(key) {
            Some(current) if Arc::ptr_eq(current, status) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes the Block2 entry for `key` only if it still is `status`.
    pub fn remove_block2_if(
        &self,
        key: &TransferKey,
        status: &Arc<Mutex<Block2Status>>,
    ) -> bool {
        let mut map = self.block2.lock().expect("registry lock poisoned");
        match map.get(key) {
            Some(current) if Arc::ptr_eq(current, status) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes every tracker that idled past its lifetime, notifying its
    /// observers of the timeout. Returns the number of transfers dropped.
    pub fn cleanup_expired(&self, now: Instant) -> usize {
        let mut dropped = 0;

        let block1: Vec<_> = {
            let map = self.block1.lock().expect("registry lock poisoned");
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (key, status) in block1 {
            let expired = {
                let status = status.lock().expect("status lock poisoned");
                now.duration_since(status.touched()) > self.lifetime
            };
            if expired && self.remove_block1_if(&key, &status) {
                let status = status.lock().expect("status lock poisoned");
                for observer in status.observers() {
                    observer.on_timeout();
                }
                dropped += 1;
            }
        }

        let block2: Vec<_> = {
            let map = self.block2.lock().expect("registry lock poisoned");
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (key, status) in block2 {
            let expired = {
                let status = status.lock().expect("status lock poisoned");
                now.duration_since(status.touched()) > self.lifetime
            };
            if expired && self.remove_block2_if(&key, &status) {
                let status = status.lock().expect("status lock poisoned");
                for observer in status.observers() {
                    observer.on_timeout();
                }
                dropped += 1;
            }
        }

        if dropped > 0 {
            tracing::warn!(
                "cleaned up {} blockwise transfer(s) idle for more than {:?}",
                dropped,
                self.lifetime
            );
        }
        dropped
    }

    /// Number of live Block1 trackers.
    pub fn block1_count(&self) -> usize {
        self.block1.lock().expect("registry lock poisoned").len()
    }

    /// Number of live Block2 trackers.
    pub fn block2_count(&self) -> usize {
        self.block2.lock().expect("registry lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bertwise_protocol::{Code, MessageObserver, Request};

    use super::*;

    fn key(token: u8) -> TransferKey {
        let mut request = Request::new(Code::Put);
        request.set_token(bertwise_protocol::Token::new(vec![token]));
        request.options_mut().set_uri_path("/res");
        TransferKey::new("10.0.0.1:5683".parse().unwrap(), &request)
    }

    fn inbound_status(now: Instant) -> Block1Status {
        Block1Status::inbound(&Request::new(Code::Put), 1024, now)
    }

    #[test]
    fn test_get_or_create_reuses_entry() {
        let registry = TransferRegistry::new(Duration::from_secs(30), 16);
        let now = Instant::now();

        let a = registry.get_or_create_block1(&key(1), || inbound_status(now)).unwrap();
        let b = registry.get_or_create_block1(&key(1), || inbound_status(now)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.block1_count(), 1);
    }

    #[test]
    fn test_registry_cap() {
        let registry = TransferRegistry::new(Duration::from_secs(30), 2);
        let now = Instant::now();

        registry.get_or_create_block1(&key(1), || inbound_status(now)).unwrap();
        registry.get_or_create_block1(&key(2), || inbound_status(now)).unwrap();
        let err = registry.get_or_create_block1(&key(3), || inbound_status(now));
        assert!(err.is_err());

        // An existing key is still served when the registry is full
        assert!(registry.get_or_create_block1(&key(2), || inbound_status(now)).is_ok());
    }

    #[test]
    fn test_identity_checked_removal() {
        let registry = TransferRegistry::new(Duration::from_secs(30), 16);
        let now = Instant::now();

        let old = registry.get_or_create_block1(&key(1), || inbound_status(now)).unwrap();
        let new = registry.reset_block1(&key(1), inbound_status(now)).unwrap();

        // Removing through the stale handle must not tear down the new one
        assert!(!registry.remove_block1_if(&key(1), &old));
        assert_eq!(registry.block1_count(), 1);
        assert!(registry.remove_block1_if(&key(1), &new));
        assert_eq!(registry.block1_count(), 0);
    }

    #[test]
    fn test_cleanup_notifies_observers() {
        struct Counter(AtomicUsize);
        impl MessageObserver for Counter {
            fn on_timeout(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = TransferRegistry::new(Duration::from_secs(30), 16);
        let start = Instant::now();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        let status = registry.get_or_create_block1(&key(1), || inbound_status(start)).unwrap();
        status.lock().unwrap().add_observer(counter.clone());

        // Fresh entry survives a sweep
        assert_eq!(registry.cleanup_expired(start), 0);
        assert_eq!(registry.block1_count(), 1);

        // Past the lifetime it is dropped and observers hear about it
        let later = start + Duration::from_secs(31);
        assert_eq!(registry.cleanup_expired(later), 1);
        assert_eq!(registry.block1_count(), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_touch_defers_cleanup() {
        let registry = TransferRegistry::new(Duration::from_secs(30), 16);
        let start = Instant::now();

        let status = registry.get_or_create_block1(&key(1), || inbound_status(start)).unwrap();
        let mid = start + Duration::from_secs(20);
        status.lock().unwrap().touch(mid);

        let sweep = start + Duration::from_secs(31);
        assert_eq!(registry.cleanup_expired(sweep), 0);
        assert_eq!(registry.block1_count(), 1);
    }
}
