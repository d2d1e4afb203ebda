// SPDX-License-Identifier: GPL-3.0-only

//! Lock helpers

use std::sync::{Mutex, MutexGuard};

/// Lock `mutex`, recovering the data if a previous holder panicked
///
/// Every value guarded in this crate stays consistent between statements, so a
/// panic elsewhere never leaves it half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
