//! Fast-path state for intent locks.
//!
//! Each locker maps to one partition. As long as every request on a resource
//! uses an intent mode, requests are granted on the partitioned lock head of
//! the requester's partition and never touch the resource's bucket. The full
//! set of granted requests for such a resource is the union of its lock
//! head's granted list and the granted lists of all its partitioned heads.
//!
//! A partition mutex may be acquired while holding a bucket mutex, never the
//! other way around.

use std::collections::HashMap;
use std::sync::Arc;

use crate::list::{Slot, SlotList};
use crate::request::{Owner, RequestRef, RequestStatus};
use crate::resource::ResourceId;
use crate::sync::StatMutex;

#[derive(Default)]
pub(crate) struct PartitionedLockHead {
    /// Only ever granted requests in intent modes.
    pub(crate) granted: SlotList<RequestRef>,
}

impl PartitionedLockHead {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Intent modes never conflict with each other, so admission is
    /// unconditional.
    pub(crate) fn new_request(&mut self, resource: ResourceId, request: &RequestRef) {
        let mut state = request.state();
        assert!(state.partitioned, "only fast-path candidates may be partitioned");
        assert!(state.mode.is_intent(), "partitioned requests must use intent modes");
        assert_eq!(state.owner, Owner::Unowned, "request is already linked");
        let slot = self.granted.push_back(Arc::clone(request));
        state.owner = Owner::Partition { resource, slot };
        state.status = RequestStatus::Granted;
    }

    pub(crate) fn remove(&mut self, slot: Slot) -> RequestRef {
        let request = self.granted.remove(slot);
        request.state().owner = Owner::Unowned;
        request
    }
}

pub(crate) type PartitionMap = HashMap<ResourceId, PartitionedLockHead>;

pub(crate) struct Partition {
    pub(crate) data: StatMutex<PartitionMap>,
}

impl Partition {
    pub(crate) fn new() -> Self {
        Self {
            data: StatMutex::new(HashMap::new()),
        }
    }
}
