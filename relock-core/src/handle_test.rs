#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::handle::{AcquireError, LockHandle};
    use crate::store::{KeyValueStore, StoreError};
    use crate::store_in_memory::InMemoryStore;
    use crate::types::{FailurePolicy, LockOptions, LockRecord};

    fn opts(ttl_ms: u64, timeout_ms: u64, poll_ms: u64) -> LockOptions {
        LockOptions::default()
            .with_ttl(Duration::from_millis(ttl_ms))
            .with_acquire_timeout(Duration::from_millis(timeout_ms))
            .with_poll_interval(Duration::from_millis(poll_ms))
    }

    /// Counts every store call; used to verify release idempotency.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryStore,
        ops: AtomicUsize,
    }

    impl CountingStore {
        fn ops(&self) -> usize {
            self.ops.load(Ordering::SeqCst)
        }
    }

    impl KeyValueStore for CountingStore {
        fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
            self.ops.fetch_add(1, Ordering::SeqCst);
            self.inner.set_if_absent(key, value)
        }
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.ops.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }
        fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
            self.ops.fetch_add(1, Ordering::SeqCst);
            self.inner.get_and_replace(key, value)
        }
        fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.ops.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(key)
        }
    }

    /// A store whose every call errors, simulating an outage.
    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn set_if_absent(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("injected outage".into()))
        }
        fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("injected outage".into()))
        }
        fn get_and_replace(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("injected outage".into()))
        }
        fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("injected outage".into()))
        }
    }

    #[test]
    fn test_acquire_on_free_key_writes_own_record() {
        let store = Arc::new(InMemoryStore::new());
        let mut handle = LockHandle::new(store.clone(), "res");

        assert!(!handle.is_held());
        assert!(handle.acquire().unwrap());
        assert!(handle.is_held());

        let raw = store.get("res").unwrap().expect("record should exist");
        let record = LockRecord::parse(&raw).expect("record should parse");
        assert_eq!(record.owner, handle.owner());

        handle.release().unwrap();
        assert!(!handle.is_held());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_is_idempotent_and_skips_store() {
        let store = Arc::new(CountingStore::default());
        let mut handle = LockHandle::new(store.clone(), "res");

        assert!(handle.acquire().unwrap());
        handle.release().unwrap();

        let ops_after_first = store.ops();
        handle.release().unwrap();
        assert_eq!(store.ops(), ops_after_first, "second release must not touch the store");
    }

    #[test]
    fn test_bounded_wait_when_lock_is_held() {
        let store = Arc::new(InMemoryStore::new());
        let mut holder = LockHandle::with_options(store.clone(), "res", opts(60_000, 1_000, 50));
        assert!(holder.acquire().unwrap());

        let mut waiter = LockHandle::with_options(store.clone(), "res", opts(60_000, 300, 50));
        let started = Instant::now();
        let acquired = waiter.acquire().unwrap();
        let elapsed = started.elapsed();

        assert!(!acquired);
        assert!(elapsed >= Duration::from_millis(250), "gave up early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "overshot the budget: {:?}", elapsed);

        holder.release().unwrap();
    }

    #[test]
    fn test_clean_release_unblocks_waiter() {
        // ttl=1000, timeout=5000, poll=100; holder releases at t=300.
        let store = Arc::new(InMemoryStore::new());
        let mut a = LockHandle::with_options(store.clone(), "res", opts(1_000, 5_000, 100));
        assert!(a.acquire().unwrap());

        let mut b = LockHandle::with_options(store.clone(), "res", opts(1_000, 5_000, 100));
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let acquired = b.acquire().unwrap();
            (acquired, started.elapsed(), b)
        });

        thread::sleep(Duration::from_millis(300));
        a.release().unwrap();

        let (acquired, elapsed, mut b) = waiter.join().expect("waiter panicked");
        assert!(acquired);
        assert!(elapsed >= Duration::from_millis(250), "acquired before release: {:?}", elapsed);
        assert!(
            elapsed < Duration::from_millis(1_500),
            "waiter should catch the freed lock within about a poll: {:?}",
            elapsed
        );

        // B created a fresh record rather than stealing A's.
        let raw = store.get("res").unwrap().expect("record should exist");
        assert_eq!(LockRecord::parse(&raw).unwrap().owner, b.owner());
        b.release().unwrap();
    }

    #[test]
    fn test_crash_recovery_steals_only_after_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let mut crashed = LockHandle::with_options(store.clone(), "res", opts(200, 1_000, 100));
        assert!(crashed.acquire().unwrap());
        // Simulated crash: the holder never releases.

        let mut contender = LockHandle::with_options(store.clone(), "res", opts(60_000, 5_000, 100));
        let started = Instant::now();
        assert!(contender.acquire().unwrap());
        let elapsed = started.elapsed();

        assert!(
            elapsed >= Duration::from_millis(150),
            "stole before the TTL elapsed: {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(2), "recovery took too long: {:?}", elapsed);

        let raw = store.get("res").unwrap().expect("record should exist");
        assert_eq!(LockRecord::parse(&raw).unwrap().owner, contender.owner());

        // The crashed holder's late release must leave the stolen record alone.
        crashed.release().unwrap();
        assert!(store.get("res").unwrap().is_some());

        contender.release().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_steal_race_has_single_winner() {
        let store = Arc::new(InMemoryStore::new());
        let stale = LockRecord::new(1, "stale").encode();
        store.get_and_replace("res", &stale).unwrap();

        // Both contenders read the same stale value, then race the swap.
        let barrier = Arc::new(Barrier::new(2));
        let contenders: Vec<_> = (0..2)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let observed = store.get("res").unwrap().expect("stale record present");
                    barrier.wait();
                    let candidate = LockRecord::new(9_999_999_999_999, format!("c{}", i)).encode();
                    let previous = store.get_and_replace("res", &candidate).unwrap();
                    previous.as_deref() == Some(observed.as_str())
                })
            })
            .collect();

        let wins = contenders
            .into_iter()
            .map(|c| c.join().expect("contender panicked"))
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1, "exactly one swap may observe the value it read");
    }

    #[test]
    fn test_cancellation_aborts_waiting_acquire() {
        let store = Arc::new(InMemoryStore::new());
        let mut holder = LockHandle::with_options(store.clone(), "res", opts(60_000, 1_000, 50));
        assert!(holder.acquire().unwrap());

        let mut waiter = LockHandle::with_options(store.clone(), "res", opts(60_000, 30_000, 50));
        let token = waiter.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            token.cancel();
        });

        let started = Instant::now();
        let result = waiter.acquire();
        assert!(matches!(result, Err(AcquireError::Cancelled)));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation should abort the wait promptly"
        );

        canceller.join().expect("canceller panicked");
        holder.release().unwrap();
    }

    #[test]
    fn test_fail_open_outage_looks_like_timeout() {
        let store = Arc::new(FailingStore);
        let mut handle = LockHandle::with_options(store, "res", opts(1_000, 200, 50));

        let acquired = handle.acquire().unwrap();
        assert!(!acquired);
    }

    #[test]
    fn test_fail_closed_outage_escalates() {
        let store = Arc::new(FailingStore);
        let options = opts(1_000, 200, 50).with_failure_policy(FailurePolicy::FailClosed);
        let mut handle = LockHandle::with_options(store, "res", options);

        assert!(matches!(handle.acquire(), Err(AcquireError::Store(_))));
    }

    #[test]
    fn test_unparseable_record_is_stolen() {
        let store = Arc::new(InMemoryStore::new());
        store.get_and_replace("res", "corrupt-record").unwrap();

        let mut handle = LockHandle::with_options(store.clone(), "res", opts(1_000, 2_000, 50));
        assert!(handle.acquire().unwrap());

        let raw = store.get("res").unwrap().expect("record should exist");
        assert_eq!(LockRecord::parse(&raw).unwrap().owner, handle.owner());
        handle.release().unwrap();
    }

    #[test]
    fn test_with_lock_runs_critical_section_and_releases() {
        let store = Arc::new(InMemoryStore::new());
        let mut handle = LockHandle::new(store.clone(), "res");

        let out = handle.with_lock(|| 7).unwrap();
        assert_eq!(out, Some(7));
        assert!(!handle.is_held());
        assert!(store.is_empty());
    }

    #[test]
    fn test_with_lock_skips_critical_section_on_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let mut holder = LockHandle::with_options(store.clone(), "res", opts(60_000, 1_000, 50));
        assert!(holder.acquire().unwrap());

        let mut waiter = LockHandle::with_options(store.clone(), "res", opts(60_000, 200, 50));
        let ran = AtomicBool::new(false);
        let out = waiter
            .with_lock(|| {
                ran.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert!(out.is_none());
        assert!(!ran.load(Ordering::SeqCst), "critical section must not run without the lock");
        holder.release().unwrap();
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let store = Arc::new(InMemoryStore::new());
        let in_critical = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let in_critical = Arc::clone(&in_critical);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..5 {
                        // One fresh handle per attempt, per the handle lifecycle.
                        let mut handle =
                            LockHandle::with_options(store.clone(), "counter", opts(10_000, 10_000, 10));
                        assert!(handle.acquire().unwrap(), "acquire should succeed within budget");
                        assert!(
                            !in_critical.swap(true, Ordering::SeqCst),
                            "two holders inside the critical section"
                        );
                        counter.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        in_critical.store(false, Ordering::SeqCst);
                        handle.release().unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("worker panicked");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert!(store.is_empty());
    }
}
