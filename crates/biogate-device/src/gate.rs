//! Per-terminal exclusivity.
//!
//! Terminals accept a single protocol session at a time, so every
//! operation against one terminal is serialized through a [`DeviceGate`].
//! Operations against different terminals never wait on each other.

use biogate_core::DeviceAddress;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Proof that the holder has exclusive use of one terminal.
pub type GatePass = OwnedMutexGuard<()>;

/// One async lock per terminal, created on first use.
#[derive(Debug, Clone)]
pub struct DeviceGate {
    default_port: u16,
    locks: Arc<Mutex<HashMap<(String, u16), Arc<AsyncMutex<()>>>>>,
}

impl DeviceGate {
    /// `default_port` is used to key addresses that carry no port, so
    /// `10.0.0.7` and `10.0.0.7:4370` share a lock.
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, address: &DeviceAddress) -> Arc<AsyncMutex<()>> {
        let key = (address.host().to_string(), address.port_or(self.default_port));
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds locks nobody is using or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    /// Wait for exclusive use of `address`.
    pub async fn acquire(&self, address: &DeviceAddress) -> GatePass {
        self.lock_for(address).lock_owned().await
    }

    /// Take exclusive use of `address` only if nobody holds it.
    pub fn try_acquire(&self, address: &DeviceAddress) -> Option<GatePass> {
        self.lock_for(address).try_lock_owned().ok()
    }

    /// Terminals with a pass held or awaited.
    #[must_use]
    pub fn busy(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(s: &str) -> DeviceAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_same_terminal_is_exclusive() {
        let gate = DeviceGate::new(4370);
        let pass = gate.acquire(&addr("10.0.0.7")).await;

        assert!(gate.try_acquire(&addr("10.0.0.7")).is_none());
        assert!(gate.try_acquire(&addr("10.0.0.7:4370")).is_none());

        drop(pass);
        assert!(gate.try_acquire(&addr("10.0.0.7")).is_some());
    }

    #[tokio::test]
    async fn test_distinct_terminals_do_not_block() {
        let gate = DeviceGate::new(4370);
        let _a = gate.acquire(&addr("10.0.0.7")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), gate.acquire(&addr("10.0.0.8")))
            .await;
        assert!(b.is_ok());
        assert!(gate.try_acquire(&addr("10.0.0.7:4371")).is_some());
    }

    #[tokio::test]
    async fn test_waiter_gets_pass_after_release() {
        let gate = DeviceGate::new(4370);
        let pass = gate.acquire(&addr("10.0.0.7")).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _pass = gate.acquire(&addr("10.0.0.7")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(pass);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let gate = DeviceGate::new(4370);
        for i in 1..=5 {
            let _pass = gate.acquire(&addr(&format!("10.0.0.{i}"))).await;
        }
        assert_eq!(gate.busy(), 0);
        let _pass = gate.acquire(&addr("10.0.0.9")).await;
        assert_eq!(gate.busy(), 1);
        assert_eq!(gate.locks.lock().unwrap().len(), 1);
    }
}
