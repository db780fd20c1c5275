//! Single FIFO pass over the pending queue.
//!
//! Entries that fit are placed and leave the queue; the rest keep their
//! relative order. A failure does not stop the scan, and the pass does not
//! restart when a later placement changes the picture.

use std::collections::VecDeque;
use std::time::Duration;

use kubesim_core::Timestamp;
use kubesim_placement::Scheduler;

use crate::registry::Registry;
use crate::types::ReconcileReport;

pub(crate) fn reconcile(
    reg: &mut Registry,
    scheduler: &Scheduler,
    now: Timestamp,
    timeout: Duration,
) -> ReconcileReport {
    if reg.pending.is_empty() {
        return ReconcileReport::default();
    }

    let mut candidates = reg.candidates(now, timeout);
    let queue = std::mem::take(&mut reg.pending);
    let mut kept = VecDeque::with_capacity(queue.len());
    let mut report = ReconcileReport::default();

    for entry in queue {
        match reg.try_place(
            scheduler,
            &mut candidates,
            &entry.pod_id,
            entry.cpu_request,
            entry.seq,
        ) {
            Some(moved) => report.placed.push(moved),
            None => kept.push_back(entry),
        }
    }

    report.still_pending = kept.len();
    reg.pending = kept;
    report
}
