use std::sync::Arc;

use lockmgr::{
    BasicLocker, LockManager, LockMode, LockRequest, LockResult, RecordingNotification,
    RequestStatus, ResourceId, ResourceType,
};

use crate::AnyResult;

struct Party {
    name: &'static str,
    request: LockRequest,
    notify: Arc<RecordingNotification>,
}

impl Party {
    fn new(name: &'static str, compatible_first: bool) -> Self {
        let notify = Arc::new(RecordingNotification::new());
        let locker = Arc::new(BasicLocker::new().with_debug_info(name));
        let request = LockRequest::new(locker, notify.clone());
        request.set_compatible_first(compatible_first);
        Self {
            name,
            request,
            notify,
        }
    }
}

/// Queues [IS, X, IS] behind an exclusive holder, releases the holder and
/// reports who got the lock. Runs once with plain FIFO and once with the
/// first IS asking for compatible-first.
pub fn run(mgr: &LockManager) -> AnyResult<()> {
    for (round, compatible_first) in [(1u64, false), (2, true)] {
        let resource = ResourceId::new(ResourceType::Database, round);
        println!("== round {round}: compatible_first={compatible_first} on {resource}");

        let holder = Party::new("holder", false);
        let first = Party::new("first-is", compatible_first);
        let writer = Party::new("writer", false);
        let last = Party::new("last-is", false);

        expect_result(mgr.lock(resource, &holder.request, LockMode::Exclusive), LockResult::Ok)?;
        for (party, mode) in [
            (&first, LockMode::IntentShared),
            (&writer, LockMode::Exclusive),
            (&last, LockMode::IntentShared),
        ] {
            expect_result(mgr.lock(resource, &party.request, mode), LockResult::Waiting)?;
        }
        print!("{}", mgr.dump_to_string(&()));

        mgr.unlock(&holder.request);
        report("holder released", [&first, &writer, &last]);
        if compatible_first != (last.request.status() == RequestStatus::Granted) {
            return Err(format!(
                "last-is granted={} with compatible_first={compatible_first}",
                last.request.status() == RequestStatus::Granted
            ));
        }

        mgr.unlock(&first.request);
        report("first-is released", [&writer, &last]);
        if compatible_first {
            mgr.unlock(&last.request);
            report("last-is released", [&writer]);
            mgr.unlock(&writer.request);
        } else {
            mgr.unlock(&writer.request);
            report("writer released", [&last]);
            mgr.unlock(&last.request);
        }
    }
    Ok(())
}

fn expect_result(actual: LockResult, expected: LockResult) -> AnyResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected:?}, got {actual:?}"))
    }
}

fn report<const N: usize>(step: &str, parties: [&Party; N]) {
    let states: Vec<String> = parties
        .iter()
        .map(|p| format!("{}={} ({} notifies)", p.name, p.request.status(), p.notify.num_notifies()))
        .collect();
    println!("{step}: {}", states.join(", "));
}
