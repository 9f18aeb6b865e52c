//! Reference-counted mount state.
//!
//! An entry exists exactly while a volume is attached for at least one
//! consumer. Changes to one volume are serialized by that volume's own lock,
//! which is also held across the attach or detach of a 0 <-> 1 transition, so
//! concurrent mounts never attach twice and concurrent unmounts never lose a
//! decrement. The table lock itself is only taken for short reads and
//! updates; a slow `ploop` on one volume never stalls another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use hdvol_common::{HdvolResult, VolumeName};

/// Attachment record for a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    /// Number of consumers; always at least 1.
    pub count: u32,
    /// Block device the image is attached to.
    pub device: String,
}

/// Outcome of [`MountTable::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// The volume had no entry.
    NotMounted,
    /// Other consumers remain; carries the new count.
    Decremented(u32),
    /// The last consumer left and the image was detached.
    Detached,
}

type VolumeLock = Arc<Mutex<()>>;

/// Mount state shared by all requests.
#[derive(Debug, Default)]
pub struct MountTable {
    entries: RwLock<HashMap<VolumeName, MountEntry>>,
    locks: Mutex<HashMap<VolumeName, VolumeLock>>,
}

impl MountTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `name`.
    ///
    /// Never waits for an attach or detach in progress; a volume that is
    /// still attaching has no entry yet.
    pub fn lookup(&self, name: &VolumeName) -> Option<MountEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Record an attachment made outside the table with a count of 1.
    ///
    /// Returns `false` if an entry already exists.
    pub fn insert(&self, name: &VolumeName, device: impl Into<String>) -> bool {
        let lock = self.volume_lock(name);
        let _guard = lock.lock();

        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(
            name.clone(),
            MountEntry {
                count: 1,
                device: device.into(),
            },
        );
        true
    }

    /// Add a consumer, calling `attach` only if there was none.
    ///
    /// # Errors
    ///
    /// Returns the `attach` failure; the table is left unchanged.
    pub fn acquire<F>(&self, name: &VolumeName, attach: F) -> HdvolResult<MountEntry>
    where
        F: FnOnce() -> HdvolResult<String>,
    {
        let lock = self.volume_lock(name);
        let _guard = lock.lock();

        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.count += 1;
            return Ok(entry.clone());
        }

        let device = match attach() {
            Ok(device) => device,
            Err(e) => {
                self.forget_lock(name, &lock);
                return Err(e);
            }
        };
        let entry = MountEntry { count: 1, device };
        self.entries.write().insert(name.clone(), entry.clone());
        Ok(entry)
    }

    /// Drop a consumer, calling `detach` with the device when it was the last.
    ///
    /// # Errors
    ///
    /// Returns the `detach` failure; the entry keeps its count of 1.
    pub fn release<F>(&self, name: &VolumeName, detach: F) -> HdvolResult<Release>
    where
        F: FnOnce(&str) -> HdvolResult<()>,
    {
        let lock = self.volume_lock(name);
        let _guard = lock.lock();

        let device = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(name) else {
                drop(entries);
                self.forget_lock(name, &lock);
                return Ok(Release::NotMounted);
            };
            if entry.count > 1 {
                entry.count -= 1;
                return Ok(Release::Decremented(entry.count));
            }
            entry.device.clone()
        };

        detach(&device)?;
        self.entries.write().remove(name);
        self.forget_lock(name, &lock);
        Ok(Release::Detached)
    }

    /// Number of mounted volumes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no volume is mounted.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn volume_lock(&self, name: &VolumeName) -> VolumeLock {
        Arc::clone(self.locks.lock().entry(name.clone()).or_default())
    }

    /// Drop the lock of an unmounted volume once nobody else holds it.
    ///
    /// Called with `lock` still held, after the last change to the entry.
    fn forget_lock(&self, name: &VolumeName, lock: &VolumeLock) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 && !self.entries.read().contains_key(name) {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdvol_common::HdvolError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn name(s: &str) -> VolumeName {
        VolumeName::new(s).unwrap()
    }

    #[test]
    fn acquire_attaches_once() {
        let table = MountTable::new();
        let vol = name("vol1");
        let attaches = AtomicUsize::new(0);
        let attach = || {
            attaches.fetch_add(1, Ordering::SeqCst);
            Ok("/dev/ploop1".to_string())
        };

        let first = table.acquire(&vol, attach).unwrap();
        let second = table.acquire(&vol, attach).unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(second.device, "/dev/ploop1");
        assert_eq!(attaches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_detaches_on_last() {
        let table = MountTable::new();
        let vol = name("vol1");
        table.insert(&vol, "/dev/ploop1");
        table.acquire(&vol, || unreachable!()).unwrap();

        let mut detached = Vec::new();
        assert_eq!(
            table.release(&vol, |_| unreachable!()).unwrap(),
            Release::Decremented(1)
        );
        assert_eq!(
            table
                .release(&vol, |dev| {
                    detached.push(dev.to_string());
                    Ok(())
                })
                .unwrap(),
            Release::Detached
        );
        assert_eq!(detached, vec!["/dev/ploop1"]);
        assert!(table.lookup(&vol).is_none());
    }

    #[test]
    fn release_unknown_is_noop() {
        let table = MountTable::new();
        assert_eq!(
            table.release(&name("ghost"), |_| unreachable!()).unwrap(),
            Release::NotMounted
        );
        assert!(table.is_empty());
    }

    #[test]
    fn failed_attach_leaves_no_entry() {
        let table = MountTable::new();
        let vol = name("vol1");
        let err = table
            .acquire(&vol, || Err(HdvolError::image("attach", "vol1", "boom")))
            .unwrap_err();
        assert!(matches!(err, HdvolError::Image { .. }));
        assert!(table.lookup(&vol).is_none());
    }

    #[test]
    fn failed_detach_keeps_entry() {
        let table = MountTable::new();
        let vol = name("vol1");
        table.insert(&vol, "/dev/ploop1");

        assert!(
            table
                .release(&vol, |_| Err(HdvolError::image("detach", "vol1", "busy")))
                .is_err()
        );
        assert_eq!(table.lookup(&vol).unwrap().count, 1);
    }

    #[test]
    fn insert_does_not_overwrite() {
        let table = MountTable::new();
        let vol = name("vol1");
        assert!(table.insert(&vol, "/dev/ploop1"));
        assert!(!table.insert(&vol, "/dev/ploop2"));
        assert_eq!(table.lookup(&vol).unwrap().device, "/dev/ploop1");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn concurrent_mounts_and_unmounts_balance() {
        let table = MountTable::new();
        let vol = name("shared");
        let attaches = AtomicUsize::new(0);
        let detaches = AtomicUsize::new(0);

        // Hold one reference throughout so unmounts never hit zero early.
        table.insert(&vol, "/dev/ploop9");

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        table
                            .acquire(&vol, || {
                                attaches.fetch_add(1, Ordering::SeqCst);
                                Ok("/dev/ploop9".to_string())
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(table.lookup(&vol).unwrap().count, 801);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        table
                            .release(&vol, |_| {
                                detaches.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(table.lookup(&vol).unwrap().count, 401);
        assert_eq!(attaches.load(Ordering::SeqCst), 0);
        assert_eq!(detaches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attach_in_progress_does_not_block_other_volumes() {
        let table = MountTable::new();
        let slow = name("slow");
        let fast = name("fast");
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        std::thread::scope(|s| {
            let pending = s.spawn(|| {
                table.acquire(&slow, move || {
                    started_tx.send(()).unwrap();
                    release_rx
                        .recv_timeout(Duration::from_secs(5))
                        .map_err(|_| HdvolError::image("attach", "slow", "never released"))?;
                    Ok("/dev/ploop1".to_string())
                })
            });
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            // "slow" is still attaching here.
            assert!(table.lookup(&slow).is_none());
            assert!(table.lookup(&fast).is_none());
            let entry = table
                .acquire(&fast, || Ok("/dev/ploop2".to_string()))
                .unwrap();
            assert_eq!(entry.count, 1);
            assert_eq!(
                table.release(&fast, |_| Ok(())).unwrap(),
                Release::Detached
            );
            assert_eq!(table.len(), 0);

            release_tx.send(()).unwrap();
            assert_eq!(pending.join().unwrap().unwrap().device, "/dev/ploop1");
        });
        assert_eq!(table.lookup(&slow).unwrap().count, 1);
    }

    #[test]
    fn same_volume_waits_for_attach() {
        let table = &MountTable::new();
        let vol = &name("vol1");
        let attaches = &AtomicUsize::new(0);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        std::thread::scope(|s| {
            let first = s.spawn(move || {
                table.acquire(vol, move || {
                    attaches.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    release_rx.recv_timeout(Duration::from_secs(5)).unwrap();
                    Ok("/dev/ploop1".to_string())
                })
            });
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            let second = s.spawn(move || {
                table.acquire(vol, || {
                    attaches.fetch_add(1, Ordering::SeqCst);
                    Ok("/dev/ploop2".to_string())
                })
            });

            release_tx.send(()).unwrap();
            first.join().unwrap().unwrap();
            let entry = second.join().unwrap().unwrap();
            assert_eq!(entry.device, "/dev/ploop1");
        });
        assert_eq!(table.lookup(vol).unwrap().count, 2);
        assert_eq!(attaches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmounted_volumes_drop_their_lock() {
        let table = MountTable::new();
        let vol = name("vol1");

        table.acquire(&vol, || Ok("/dev/ploop1".to_string())).unwrap();
        assert_eq!(table.tracked_locks(), 1);
        table.release(&vol, |_| Ok(())).unwrap();
        assert_eq!(table.tracked_locks(), 0);

        table.release(&name("ghost"), |_| unreachable!()).unwrap();
        let _ = table.acquire(&vol, || Err(HdvolError::image("attach", "vol1", "boom")));
        assert_eq!(table.tracked_locks(), 0);
    }

    proptest! {
        #[test]
        fn attached_iff_more_mounts_than_unmounts(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let table = MountTable::new();
            let vol = name("vol1");
            let mut attached = false;
            let mut net: i64 = 0;
            let mut attaches = 0;
            let mut detaches = 0;

            for mount in ops {
                if mount {
                    table.acquire(&vol, || {
                        attaches += 1;
                        attached = true;
                        Ok("/dev/ploop1".to_string())
                    }).unwrap();
                    net += 1;
                } else {
                    table.release(&vol, |_| {
                        detaches += 1;
                        attached = false;
                        Ok(())
                    }).unwrap();
                    net = (net - 1).max(0);
                }
                prop_assert_eq!(attached, net > 0);
                prop_assert_eq!(table.lookup(&vol).map(|e| i64::from(e.count)), (net > 0).then_some(net));
            }
            prop_assert!(attaches - detaches <= 1);
        }
    }
}
