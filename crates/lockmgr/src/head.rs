//! Per-resource lock state.
//!
//! There is one [`LockHead`] for each resource that has been referenced since
//! the last cleanup sweep. It lives in the bucket map of its resource and is
//! only accessed under that bucket's mutex.

use std::sync::Arc;

use crate::list::SlotList;
use crate::mode::{INTENT_MODES, LOCK_MODES_COUNT, LockMode, conflicts, mode_mask};
use crate::notify::LockResult;
use crate::partition::Partition;
use crate::request::{Owner, RequestRef, RequestStatus};
use crate::resource::ResourceId;

pub(crate) struct LockHead {
    resource_id: ResourceId,

    /// Granted and converting requests. Newly granted requests go to the
    /// back; conversions are resolved front to back.
    pub(crate) granted: SlotList<RequestRef>,
    /// Grants plus pending conversion targets, per mode.
    pub(crate) granted_counts: [u32; LOCK_MODES_COUNT],
    /// One bit per mode with a non-zero granted count.
    pub(crate) granted_modes: u32,

    /// Waiting requests, granted front to back. Requests queue at the back
    /// unless they asked to jump the queue.
    pub(crate) conflicts: SlotList<RequestRef>,
    pub(crate) conflict_counts: [u32; LOCK_MODES_COUNT],
    pub(crate) conflict_modes: u32,

    /// Partitions that may hold partitioned heads for this resource. While
    /// non-empty, only intent modes are granted and nothing is waiting.
    pub(crate) partitions: Vec<usize>,

    /// Requests on the granted list in [`RequestStatus::Converting`].
    pub(crate) conversions_count: u32,
    /// Granted requests that asked for the compatible-first policy.
    pub(crate) compatible_first_count: u32,
}

impl LockHead {
    pub(crate) fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            granted: SlotList::new(),
            granted_counts: [0; LOCK_MODES_COUNT],
            granted_modes: 0,
            conflicts: SlotList::new(),
            conflict_counts: [0; LOCK_MODES_COUNT],
            conflict_modes: 0,
            partitions: Vec::new(),
            conversions_count: 0,
            compatible_first_count: 0,
        }
    }

    pub(crate) fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub(crate) fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// True when a fast-path request may start (or keep) partitioning.
    pub(crate) fn admits_partitioning(&self) -> bool {
        self.granted_modes & !INTENT_MODES == 0 && self.conflict_modes == 0
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.granted_modes == 0
    }

    /// Finishes admission of a request: grant it, or queue it on conflict.
    pub(crate) fn new_request(&mut self, request: &RequestRef) -> LockResult {
        let mut state = request.state();
        assert_eq!(state.owner, Owner::Unowned, "request is already linked");

        // `partitioned` is left alone: during migration it records that the
        // request started on the fast path.
        let mode = state.mode;
        if conflicts(mode, self.granted_modes)
            || (self.compatible_first_count == 0 && conflicts(mode, self.conflict_modes))
        {
            state.status = RequestStatus::Waiting;
            let slot = if state.enqueue_at_front {
                self.conflicts.push_front(Arc::clone(request))
            } else {
                self.conflicts.push_back(Arc::clone(request))
            };
            state.owner = Owner::Head {
                resource: self.resource_id,
                slot,
            };
            self.inc_conflict_mode_count(mode);
            return LockResult::Waiting;
        }

        state.status = RequestStatus::Granted;
        let slot = self.granted.push_back(Arc::clone(request));
        state.owner = Owner::Head {
            resource: self.resource_id,
            slot,
        };
        self.inc_granted_mode_count(mode);
        if state.compatible_first {
            self.compatible_first_count += 1;
        }
        LockResult::Ok
    }

    /// Upgrades a granted request. The caller has already handled conversions
    /// to covered modes and rejected unrelated ones.
    pub(crate) fn convert(&mut self, request: &RequestRef, new_mode: LockMode) -> LockResult {
        let mut state = request.state();
        self.assert_owns(&state.owner);
        assert_eq!(state.status, RequestStatus::Granted);

        // Only granted holders count, not waiters. This favours conversions
        // over queued requests: with T1 holding IS, T2 waiting for X and T1
        // upgrading to S, T1 is granted rather than deadlocking behind T2.
        let others = self.granted_modes_excluding(state.mode, LockMode::None);
        if conflicts(new_mode, others) {
            state.status = RequestStatus::Converting;
            state.convert_mode = new_mode;
            self.conversions_count += 1;
            self.inc_granted_mode_count(new_mode);
            return LockResult::Waiting;
        }

        self.inc_granted_mode_count(new_mode);
        self.dec_granted_mode_count(state.mode);
        state.mode = new_mode;
        LockResult::Ok
    }

    /// Release path for a request whose recursive count has already been
    /// decremented to `remaining`. Returns true when fully released.
    pub(crate) fn release(&mut self, request: &RequestRef, remaining: u32) -> bool {
        let mut state = request.state();
        self.assert_owns(&state.owner);
        let Owner::Head { slot, .. } = state.owner else {
            unreachable!()
        };

        match state.status {
            RequestStatus::Granted => {
                if remaining > 0 {
                    // A pending conversion was granted between the caller's
                    // status check and this point.
                    return false;
                }
                let mode = state.mode;
                let compatible_first = state.compatible_first;
                state.owner = Owner::Unowned;
                drop(state);

                self.granted.remove(slot);
                self.dec_granted_mode_count(mode);
                if compatible_first {
                    assert!(self.compatible_first_count > 0);
                    self.compatible_first_count -= 1;
                    assert!(self.compatible_first_count == 0 || !self.granted.is_empty());
                }
                let drained = self.granted_counts[mode.index()] == 0;
                self.on_lock_mode_changed(drained);
            }
            RequestStatus::Waiting => {
                assert_eq!(remaining, 0, "cancelled request must not be held recursively");
                let mode = state.mode;
                state.owner = Owner::Unowned;
                drop(state);

                self.conflicts.remove(slot);
                self.dec_conflict_mode_count(mode);
                self.on_lock_mode_changed(true);
            }
            RequestStatus::Converting => {
                assert!(remaining > 0, "converting request lost its original grant");
                assert!(self.conversions_count > 0);
                // Back to the mode held before the conversion was requested.
                let target = state.convert_mode;
                state.status = RequestStatus::Granted;
                state.convert_mode = LockMode::None;
                drop(state);

                self.conversions_count -= 1;
                self.dec_granted_mode_count(target);
                let drained = self.granted_counts[target.index()] == 0;
                self.on_lock_mode_changed(drained);
            }
            RequestStatus::New => unreachable!("unlock of a request that was never locked"),
        }

        remaining == 0
    }

    pub(crate) fn downgrade(&mut self, request: &RequestRef, new_mode: LockMode) {
        let mut state = request.state();
        self.assert_owns(&state.owner);
        let old_mode = state.mode;
        state.mode = new_mode;
        drop(state);

        self.inc_granted_mode_count(new_mode);
        self.dec_granted_mode_count(old_mode);
        self.on_lock_mode_changed(true);
    }

    /// Moves every request held on partitioned heads for this resource into
    /// this head. Must be called with the bucket mutex held and no partition
    /// mutex held.
    pub(crate) fn migrate_partitioned_lock_heads(&mut self, partitions: &[Partition]) {
        assert!(self.is_partitioned());
        assert!(
            self.admits_partitioning(),
            "partitioned lock head has non-intent grants or conflicts"
        );

        let mut migrated = 0usize;
        // A partition leaves the list only once it is drained, so the head
        // reads as partitioned for the whole migration.
        while let Some(&index) = self.partitions.last() {
            let mut data = partitions[index].data.lock();
            if let Some(mut partitioned) = data.remove(&self.resource_id) {
                while let Some(request) = partitioned.granted.pop_front() {
                    request.state().owner = Owner::Unowned;
                    let result = self.new_request(&request);
                    assert_eq!(result, LockResult::Ok, "migrated intent grant must stay granted");
                    migrated += 1;
                }
            }
            drop(data);
            self.partitions.pop();
        }

        tracing::debug!(resource = %self.resource_id, migrated, "migrated partitioned lock heads");
    }

    /// Grants whatever a release, downgrade or cancelled conversion unblocked.
    pub(crate) fn on_lock_mode_changed(&mut self, check_conflict_queue: bool) {
        // Converting requests still sit on the granted list, so resolve them
        // first.
        let mut cursor = self.granted.front();
        while let Some(slot) = cursor {
            if self.conversions_count == 0 {
                break;
            }
            cursor = self.granted.next(slot);

            let request = Arc::clone(self.granted.get(slot));
            let mut state = request.state();
            if state.status != RequestStatus::Converting {
                continue;
            }
            assert_ne!(state.convert_mode, LockMode::None);

            let others = self.granted_modes_excluding(state.mode, state.convert_mode);
            if conflicts(state.convert_mode, others) {
                continue;
            }

            self.conversions_count -= 1;
            self.dec_granted_mode_count(state.mode);
            state.status = RequestStatus::Granted;
            state.mode = state.convert_mode;
            state.convert_mode = LockMode::None;
            drop(state);

            request.notify(self.resource_id, LockResult::Ok);
        }

        // Grant waiters that are now compatible. This is slightly unfair: past
        // the head of the queue, compatible requests are granted even when
        // conflicting ones are queued ahead of them, so that a queue such as
        // S X S X S X does not degrade into sequential execution. The head of
        // the queue itself is never passed over unless this very scan
        // switched the resource to compatible-first.
        let mut newly_compatible_first = false;
        let mut cursor = if check_conflict_queue {
            self.conflicts.front()
        } else {
            None
        };
        while let Some(slot) = cursor {
            cursor = self.conflicts.next(slot);

            let request = Arc::clone(self.conflicts.get(slot));
            let mode = {
                let state = request.state();
                assert_eq!(state.status, RequestStatus::Waiting);
                state.mode
            };

            if conflicts(mode, self.granted_modes) {
                if self.conflicts.prev(slot).is_none() && !newly_compatible_first {
                    break;
                }
                continue;
            }

            self.conflicts.remove(slot);
            self.dec_conflict_mode_count(mode);
            let granted_slot = self.granted.push_back(Arc::clone(&request));
            self.inc_granted_mode_count(mode);

            let compatible_first = {
                let mut state = request.state();
                state.status = RequestStatus::Granted;
                state.owner = Owner::Head {
                    resource: self.resource_id,
                    slot: granted_slot,
                };
                state.compatible_first
            };
            if compatible_first {
                newly_compatible_first |= self.compatible_first_count == 0;
                self.compatible_first_count += 1;
            }

            request.notify(self.resource_id, LockResult::Ok);

            // Nothing is compatible with a freshly granted X.
            if mode == LockMode::Exclusive {
                break;
            }
        }

        assert_eq!(
            self.granted_modes == 0,
            self.granted.is_empty(),
            "granted modes out of sync with the granted list"
        );
        assert_eq!(
            self.conflict_modes == 0,
            self.conflicts.is_empty(),
            "conflict modes out of sync with the conflict list"
        );
    }

    /// Mask of granted modes not accounted for by one request that holds
    /// `holds` and waits for `waits` (either may be [`LockMode::None`]).
    fn granted_modes_excluding(&self, holds: LockMode, waits: LockMode) -> u32 {
        let mut mask = 0;
        // Skip None: it is never granted in its own right.
        for mode in &LockMode::ALL[1..] {
            let held = u32::from(holds == *mode);
            let waited = u32::from(waits == *mode);
            assert!(held + waited <= 1, "cannot both hold and wait for {mode}");
            if self.granted_counts[mode.index()] > held + waited {
                mask |= mode_mask(*mode);
            }
        }
        mask
    }

    fn assert_owns(&self, owner: &Owner) {
        assert!(
            matches!(owner, Owner::Head { resource, .. } if *resource == self.resource_id),
            "request {owner:?} is not owned by lock head {}",
            self.resource_id
        );
    }

    pub(crate) fn inc_granted_mode_count(&mut self, mode: LockMode) {
        let count = &mut self.granted_counts[mode.index()];
        *count += 1;
        if *count == 1 {
            assert_eq!(self.granted_modes & mode_mask(mode), 0);
            self.granted_modes |= mode_mask(mode);
        }
    }

    pub(crate) fn dec_granted_mode_count(&mut self, mode: LockMode) {
        let count = &mut self.granted_counts[mode.index()];
        assert!(*count >= 1, "granted count underflow for {mode}");
        *count -= 1;
        if *count == 0 {
            assert_eq!(self.granted_modes & mode_mask(mode), mode_mask(mode));
            self.granted_modes &= !mode_mask(mode);
        }
    }

    fn inc_conflict_mode_count(&mut self, mode: LockMode) {
        let count = &mut self.conflict_counts[mode.index()];
        *count += 1;
        if *count == 1 {
            assert_eq!(self.conflict_modes & mode_mask(mode), 0);
            self.conflict_modes |= mode_mask(mode);
        }
    }

    fn dec_conflict_mode_count(&mut self, mode: LockMode) {
        let count = &mut self.conflict_counts[mode.index()];
        assert!(*count >= 1, "conflict count underflow for {mode}");
        *count -= 1;
        if *count == 0 {
            assert_eq!(self.conflict_modes & mode_mask(mode), mode_mask(mode));
            self.conflict_modes &= !mode_mask(mode);
        }
    }

    /// Checked before a cleanup sweep frees this head.
    pub(crate) fn assert_empty(&self) {
        assert_eq!(self.granted_modes, 0);
        assert!(self.granted.is_empty());
        assert_eq!(self.conflict_modes, 0);
        assert!(self.conflicts.is_empty());
        assert_eq!(self.conversions_count, 0);
        assert_eq!(self.compatible_first_count, 0);
        assert!(!self.is_partitioned());
    }
}
