//! Routing of lock operations to buckets and partitions.
//!
//! Resources hash to a bucket, lockers hash to a partition. Each bucket mutex
//! guards the lock heads of its resources and each partition mutex guards the
//! partitioned lock heads of its lockers. There is no global mutex.
//!
//! Lock ordering: bucket, then partition, then request state.

use std::collections::HashMap;

use crate::config::LockManagerConfig;
use crate::head::LockHead;
use crate::locker::LockerId;
use crate::mode::{LockMode, is_mode_covered};
use crate::notify::LockResult;
use crate::partition::{Partition, PartitionedLockHead};
use crate::request::{LockRequest, Owner, RequestStatus};
use crate::resource::ResourceId;
use crate::sync::StatMutex;

pub(crate) type BucketMap = HashMap<ResourceId, LockHead>;

pub(crate) struct LockBucket {
    pub(crate) data: StatMutex<BucketMap>,
}

impl LockBucket {
    fn new() -> Self {
        Self {
            data: StatMutex::new(HashMap::new()),
        }
    }
}

pub struct LockManager {
    pub(crate) buckets: Box<[LockBucket]>,
    pub(crate) partitions: Box<[Partition]>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::build(LockManagerConfig::default())
    }

    pub fn with_config(config: LockManagerConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: LockManagerConfig) -> Self {
        Self {
            buckets: (0..config.num_buckets).map(|_| LockBucket::new()).collect(),
            partitions: (0..config.num_partitions).map(|_| Partition::new()).collect(),
        }
    }

    pub fn config(&self) -> LockManagerConfig {
        LockManagerConfig {
            num_buckets: self.buckets.len(),
            num_partitions: self.partitions.len(),
        }
    }

    /// Acquires `resource` in `mode` on behalf of the request's locker.
    ///
    /// On [`LockResult::Waiting`] the request is queued and its notification
    /// fires once it is granted. Unlocking a waiting request cancels it.
    ///
    /// Panics if the request is not fresh.
    pub fn lock(&self, resource: ResourceId, request: &LockRequest, mode: LockMode) -> LockResult {
        let request = &request.inner;
        let candidate = {
            let mut state = request.state();
            assert_eq!(state.status, RequestStatus::New, "lock of a request that is not fresh");
            assert_eq!(request.recursive_count(), 1, "lock of a request that is not fresh");
            state.partitioned = mode.is_intent();
            state.mode = mode;
            state.partitioned
        };
        let locker = request.locker_id();

        if candidate {
            let mut data = self.partition_for(locker).data.lock();
            if let Some(partitioned) = data.get_mut(&resource) {
                partitioned.new_request(resource, request);
                tracing::trace!(%resource, %locker, %mode, "granted on partitioned lock head");
                return LockResult::Ok;
            }
        }

        let mut heads = self.bucket_for(resource).data.lock();
        let head = heads
            .entry(resource)
            .or_insert_with(|| LockHead::new(resource));

        if candidate && head.admits_partitioning() {
            let index = self.partition_index(locker);
            let mut data = self.partitions[index].data.lock();
            let partitioned = data.entry(resource).or_insert_with(PartitionedLockHead::new);
            if !head.partitions.contains(&index) {
                head.partitions.push(index);
            }
            partitioned.new_request(resource, request);
            tracing::trace!(%resource, %locker, %mode, partition = index, "started partitioning");
            return LockResult::Ok;
        }

        if head.is_partitioned() {
            head.migrate_partitioned_lock_heads(&self.partitions);
        }
        request.state().partitioned = false;

        let result = head.new_request(request);
        tracing::trace!(%resource, %locker, %mode, ?result, "lock");
        result
    }

    /// Upgrades a granted request to `new_mode`. Covered modes succeed
    /// immediately without touching any counts; every call, successful or
    /// not, needs its own [`unlock`](Self::unlock).
    ///
    /// Panics unless the request is granted and `new_mode` is at least as
    /// strong as its current mode.
    pub fn convert(
        &self,
        resource: ResourceId,
        request: &LockRequest,
        new_mode: LockMode,
    ) -> LockResult {
        let request = &request.inner;
        {
            let state = request.state();
            assert_eq!(
                state.status,
                RequestStatus::Granted,
                "convert of a request that is not granted"
            );
            assert!(request.recursive_count() > 0);
            request.increment_recursive_count();

            if is_mode_covered(new_mode, state.mode) {
                return LockResult::Ok;
            }
            assert!(
                is_mode_covered(state.mode, new_mode),
                "unsupported conversion from {} to {}",
                state.mode,
                new_mode
            );
        }

        let mut heads = self.bucket_for(resource).data.lock();
        let Some(head) = heads.get_mut(&resource) else {
            panic!("convert on {resource} without a lock head");
        };
        if head.is_partitioned() {
            head.migrate_partitioned_lock_heads(&self.partitions);
        }

        let result = head.convert(request, new_mode);
        tracing::trace!(%resource, locker = %request.locker_id(), %new_mode, ?result, "convert");
        result
    }

    /// Releases one reference. Returns true when the request is no longer
    /// linked anywhere, at which point it may be dropped or
    /// [`reset`](LockRequest::reset).
    pub fn unlock(&self, request: &LockRequest) -> bool {
        let request = &request.inner;
        let remaining = request.decrement_recursive_count();
        let (status, partitioned) = {
            let state = request.state();
            (state.status, state.partitioned)
        };
        if status == RequestStatus::Granted && remaining > 0 {
            return false;
        }

        if partitioned {
            let mut data = self.partition_for(request.locker_id()).data.lock();
            let owner = request.state().owner;
            // Otherwise the request has been migrated to its lock head.
            if let Owner::Partition { resource, slot } = owner {
                let Some(partitioned) = data.get_mut(&resource) else {
                    panic!("partitioned request on {resource} without a partitioned lock head");
                };
                partitioned.remove(slot);
                tracing::trace!(%resource, locker = %request.locker_id(), "released partitioned lock");
                return true;
            }
        }

        let resource = match request.state().owner {
            Owner::Head { resource, .. } => resource,
            owner => panic!("unlock of a request that is not linked to a lock head: {owner:?}"),
        };
        let mut heads = self.bucket_for(resource).data.lock();
        let Some(head) = heads.get_mut(&resource) else {
            panic!("unlock on {resource} without a lock head");
        };
        let released = head.release(request, remaining);
        tracing::trace!(%resource, locker = %request.locker_id(), ?status, released, "unlock");
        released
    }

    /// Weakens a granted request to `new_mode` and grants whatever that
    /// unblocks.
    pub fn downgrade(&self, request: &LockRequest, new_mode: LockMode) {
        let request = &request.inner;
        let (owner, partitioned) = {
            let state = request.state();
            assert_eq!(
                state.status,
                RequestStatus::Granted,
                "downgrade of a request that is not granted"
            );
            assert!(request.recursive_count() > 0);
            assert!(
                is_mode_covered(new_mode, state.mode),
                "downgrade from {} to {} is not a weakening",
                state.mode,
                new_mode
            );
            (state.owner, state.partitioned)
        };

        if partitioned && new_mode.is_intent() {
            let _data = self.partition_for(request.locker_id()).data.lock();
            let mut state = request.state();
            if let Owner::Partition { .. } = state.owner {
                // Intent modes are mutually compatible, so nothing else changes.
                state.mode = new_mode;
                return;
            }
        }

        let resource = match owner {
            Owner::Head { resource, .. } | Owner::Partition { resource, .. } => resource,
            Owner::Unowned => panic!("downgrade of a request that is not linked"),
        };
        let mut heads = self.bucket_for(resource).data.lock();
        let Some(head) = heads.get_mut(&resource) else {
            panic!("downgrade on {resource} without a lock head");
        };
        if head.is_partitioned() {
            head.migrate_partitioned_lock_heads(&self.partitions);
        }
        head.downgrade(request, new_mode);
        tracing::trace!(%resource, locker = %request.locker_id(), %new_mode, "downgrade");
    }

    /// Whether anybody is queued behind the resource this request holds.
    /// Requests still held on the fast path report false.
    pub fn has_conflicting_requests(&self, request: &LockRequest) -> bool {
        let Owner::Head { resource, .. } = request.inner.state().owner else {
            return false;
        };
        let heads = self.bucket_for(resource).data.lock();
        heads
            .get(&resource)
            .is_some_and(|head| !head.conflicts.is_empty())
    }

    /// Migrates partitioned resources and frees lock heads nobody holds.
    pub fn cleanup_unused_locks(&self) {
        let partitions = &self.partitions;
        let mut freed = 0usize;
        for bucket in self.buckets.iter() {
            let mut heads = bucket.data.lock();
            heads.retain(|_, head| {
                if head.is_partitioned() {
                    head.migrate_partitioned_lock_heads(partitions);
                }
                if !head.is_unused() {
                    return true;
                }
                head.assert_empty();
                freed += 1;
                false
            });
        }
        tracing::debug!(freed, remaining = self.num_lock_heads(), "cleaned up unused locks");
    }

    pub fn num_lock_heads(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.data.lock().len()).sum()
    }

    pub(crate) fn bucket_for(&self, resource: ResourceId) -> &LockBucket {
        let index = resource.full_hash() % self.buckets.len() as u64;
        &self.buckets[index as usize]
    }

    fn partition_index(&self, locker: LockerId) -> usize {
        (locker.0 % self.partitions.len() as u64) as usize
    }

    fn partition_for(&self, locker: LockerId) -> &Partition {
        &self.partitions[self.partition_index(locker)]
    }

    #[cfg(test)]
    pub(crate) fn inspect_head<R>(
        &self,
        resource: ResourceId,
        f: impl FnOnce(&LockHead) -> R,
    ) -> Option<R> {
        let heads = self.bucket_for(resource).data.lock();
        heads.get(&resource).map(f)
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.cleanup_unused_locks();
        let leaked = self.num_lock_heads();
        if leaked > 0 {
            tracing::warn!(leaked, "lock manager dropped with locks still held");
        }
    }
}
