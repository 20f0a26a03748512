use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex},
};

/// Strict-FIFO mutex. Waiters take a ticket on arrival and are served in
/// ticket order, so edits against one disk are never reordered relative to
/// their arrival.
#[derive(Default)]
pub(crate) struct TicketLock {
    state: Mutex<TicketState>,
    released: Condvar,
}

#[derive(Default)]
struct TicketState {
    next_ticket: u64,
    now_serving: u64,
}

impl TicketLock {
    pub(crate) fn lock(&self) -> TicketGuard<'_> {
        let mut state = self.state.lock().expect("ticket lock poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.now_serving != ticket {
            state = self.released.wait(state).expect("ticket lock poisoned");
        }
        TicketGuard { lock: self }
    }
}

pub(crate) struct TicketGuard<'a> {
    lock: &'a TicketLock,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().expect("ticket lock poisoned");
        state.now_serving += 1;
        self.lock.released.notify_all();
    }
}

/// Registry handing out one `TicketLock` per disk path. Locks are created on
/// first use and kept for the engine's lifetime; the handful of disks a host
/// carries makes eviction pointless.
#[derive(Default)]
pub(crate) struct DiskLocks {
    locks: Mutex<HashMap<PathBuf, Arc<TicketLock>>>,
}

impl DiskLocks {
    pub(crate) fn get(&self, disk: &Path) -> Arc<TicketLock> {
        self.locks
            .lock()
            .expect("disk lock registry poisoned")
            .entry(disk.to_path_buf())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{thread, time::Duration};

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(TicketLock::default());
        let shared = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let lock = lock.clone();
            let shared = shared.clone();
            handles.push(thread::spawn(move || {
                let _guard = lock.lock();
                // Two interleaved critical sections would interleave pushes.
                shared.lock().unwrap().push(i);
                thread::sleep(Duration::from_millis(1));
                shared.lock().unwrap().push(i);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let order = shared.lock().unwrap();
        assert_eq!(order.len(), 16);
        for pair in order.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_arrival_order_is_served_in_order() {
        let lock = Arc::new(TicketLock::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = lock.lock();
        let mut handles = Vec::new();
        for i in 0..4 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                let _guard = lock.lock();
                order.lock().unwrap().push(i);
            }));
            // Stagger arrivals so each thread has queued before the next.
            thread::sleep(Duration::from_millis(50));
        }
        drop(guard);
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_registry_hands_out_one_lock_per_path() {
        let locks = DiskLocks::default();
        let a1 = locks.get(Path::new("/dev/sda"));
        let a2 = locks.get(Path::new("/dev/sda"));
        let b = locks.get(Path::new("/dev/sdb"));
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
