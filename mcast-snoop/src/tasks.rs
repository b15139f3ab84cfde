//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use mcast_utils::task::IntervalTask;

use crate::consts::SWEEP_INTERVAL;
use crate::manager::HostManager;

// Host aging sweep, run once per second for the lifetime of the manager.
//
// The task holds only a weak reference so a forgotten handle can't keep the
// manager alive.
pub(crate) fn age_sweep(manager: &Arc<HostManager>) -> IntervalTask {
    let manager = Arc::downgrade(manager);
    IntervalTask::new(Duration::from_secs(SWEEP_INTERVAL), true, move || {
        let manager = manager.clone();
        async move {
            if let Some(manager) = manager.upgrade() {
                manager.sweep();
            }
        }
    })
}
