//! Read-only introspection of lock state.
//!
//! Nothing here migrates, frees or grants anything. Buckets are visited one
//! at a time, so a snapshot is consistent per resource but not across
//! resources.

use std::collections::BTreeMap;

use facet::Facet;

use crate::head::LockHead;
use crate::locker::LockerId;
use crate::manager::LockManager;
use crate::partition::Partition;
use crate::request::RequestInner;
use crate::resource::ResourceId;
use crate::sync::MutexStats;

/// Supplies a description of the client behind a locker, if any.
pub trait ClientRegistry {
    fn client_info(&self, locker: LockerId) -> Option<String>;
}

impl ClientRegistry for () {
    fn client_info(&self, _locker: LockerId) -> Option<String> {
        None
    }
}

impl ClientRegistry for BTreeMap<LockerId, String> {
    fn client_info(&self, locker: LockerId) -> Option<String> {
        self.get(&locker).cloned()
    }
}

// ── Snapshot types ───────────────────────────────────────

#[derive(Facet, Debug, Clone, PartialEq)]
pub struct LockManagerSnapshot {
    pub resources: Vec<ResourceSnapshot>,
}

#[derive(Facet, Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub resource: String,
    pub resource_type: String,
    pub hash_id: u64,
    /// Granted and converting requests on the lock head, in queue order.
    pub granted: Vec<RequestSnapshot>,
    /// Requests still granted on the fast path.
    pub partitioned: Vec<RequestSnapshot>,
    pub pending: Vec<RequestSnapshot>,
}

#[derive(Facet, Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub locker_id: u64,
    pub mode: String,
    pub convert_mode: String,
    pub status: String,
    pub recursive_count: u32,
    pub enqueue_at_front: bool,
    pub compatible_first: bool,
    pub debug_info: String,
    pub thread: Option<String>,
    pub client_info: Option<String>,
}

#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ContentionSnapshot {
    /// Mutexes acquired at least once, by bucket index.
    pub buckets: Vec<MutexContention>,
    /// Same, by partition index.
    pub partitions: Vec<MutexContention>,
}

#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct MutexContention {
    pub index: u32,
    pub acquires: u64,
    pub contended: u64,
    pub wait_nanos: u64,
}

impl LockManagerSnapshot {
    pub fn to_json(&self) -> Result<String, String> {
        facet_json::to_string(self).map_err(|e| format!("encode lock snapshot: {e}"))
    }

    pub fn find(&self, resource: ResourceId) -> Option<&ResourceSnapshot> {
        let text = resource.to_string();
        self.resources.iter().find(|r| r.resource == text)
    }
}

impl RequestSnapshot {
    fn capture(request: &RequestInner, clients: &dyn ClientRegistry) -> Self {
        let locker = request.locker();
        let (mode, convert_mode, status, enqueue_at_front, compatible_first) = {
            let state = request.state();
            (
                state.mode,
                state.convert_mode,
                state.status,
                state.enqueue_at_front,
                state.compatible_first,
            )
        };
        Self {
            locker_id: locker.id().0,
            mode: mode.name().to_string(),
            convert_mode: convert_mode.name().to_string(),
            status: status.name().to_string(),
            recursive_count: request.recursive_count(),
            enqueue_at_front,
            compatible_first,
            debug_info: locker.debug_info(),
            thread: locker.thread_name(),
            client_info: clients.client_info(locker.id()),
        }
    }

    fn write_line(&self, out: &mut String) {
        out.push_str(&format!(
            "\tLockRequest {}: Mode = {}; Thread = {}; ConvertMode = {}; EnqueueAtFront = {}; \
             CompatibleFirst = {}; DebugInfo = {}",
            self.locker_id,
            self.mode,
            self.thread.as_deref().unwrap_or("unknown"),
            self.convert_mode,
            self.enqueue_at_front,
            self.compatible_first,
            self.debug_info,
        ));
        if let Some(client) = &self.client_info {
            out.push_str(&format!("; ClientInfo = {client}"));
        }
        out.push('\n');
    }
}

impl ResourceSnapshot {
    fn capture(head: &LockHead, partitions: &[Partition], clients: &dyn ClientRegistry) -> Self {
        let resource = head.resource_id();
        let mut partitioned = Vec::new();
        for &index in &head.partitions {
            let data = partitions[index].data.lock();
            if let Some(fast) = data.get(&resource) {
                partitioned.extend(
                    fast.granted
                        .iter()
                        .map(|request| RequestSnapshot::capture(request, clients)),
                );
            }
        }
        Self {
            resource: resource.to_string(),
            resource_type: resource.resource_type().name().to_string(),
            hash_id: resource.hash_id(),
            granted: head
                .granted
                .iter()
                .map(|request| RequestSnapshot::capture(request, clients))
                .collect(),
            partitioned,
            pending: head
                .conflicts
                .iter()
                .map(|request| RequestSnapshot::capture(request, clients))
                .collect(),
        }
    }

    fn is_held(&self) -> bool {
        !self.granted.is_empty() || !self.partitioned.is_empty()
    }

    /// The block `LockManager::dump` logs for this resource.
    pub fn to_text(&self) -> String {
        let mut out = format!("Lock {}\n", self.resource);
        out.push_str("GRANTED:\n");
        for request in &self.granted {
            request.write_line(&mut out);
        }
        if !self.partitioned.is_empty() {
            out.push_str("PARTITIONED:\n");
            for request in &self.partitioned {
                request.write_line(&mut out);
            }
        }
        out.push_str("PENDING:\n");
        for request in &self.pending {
            request.write_line(&mut out);
        }
        out.push_str("-----------------------------------------------------------\n");
        out
    }
}

// ── LockManager introspection ────────────────────────────

impl LockManager {
    /// Every resource that somebody holds, ordered by resource id.
    pub fn lock_info(&self, clients: &dyn ClientRegistry) -> LockManagerSnapshot {
        let mut resources = Vec::new();
        for bucket in self.buckets.iter() {
            let heads = bucket.data.lock();
            for head in heads.values() {
                let snapshot = ResourceSnapshot::capture(head, &self.partitions, clients);
                if snapshot.is_held() {
                    resources.push((head.resource_id(), snapshot));
                }
            }
        }
        resources.sort_by_key(|(resource, _)| *resource);
        LockManagerSnapshot {
            resources: resources.into_iter().map(|(_, snapshot)| snapshot).collect(),
        }
    }

    pub fn dump_to_string(&self, clients: &dyn ClientRegistry) -> String {
        self.lock_info(clients)
            .resources
            .iter()
            .map(ResourceSnapshot::to_text)
            .collect()
    }

    /// Logs one record per held resource.
    pub fn dump(&self, clients: &dyn ClientRegistry) {
        let snapshot = self.lock_info(clients);
        tracing::info!(resources = snapshot.resources.len(), "dumping lock manager state");
        for resource in &snapshot.resources {
            tracing::info!("{}", resource.to_text());
        }
    }

    /// Acquisition statistics for bucket and partition mutexes. Empty unless
    /// the `diagnostics` feature is enabled.
    pub fn contention_snapshot(&self) -> ContentionSnapshot {
        ContentionSnapshot {
            buckets: collect_contention(self.buckets.iter().map(|b| b.data.stats())),
            partitions: collect_contention(self.partitions.iter().map(|p| p.data.stats())),
        }
    }
}

fn collect_contention(stats: impl Iterator<Item = MutexStats>) -> Vec<MutexContention> {
    stats
        .enumerate()
        .filter(|(_, stats)| stats.acquires > 0)
        .map(|(index, stats)| MutexContention {
            index: index as u32,
            acquires: stats.acquires,
            contended: stats.contended,
            wait_nanos: stats.wait_nanos,
        })
        .collect()
}
