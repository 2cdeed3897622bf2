//! Process-wide exclusive ownership of camera devices.

use crate::error::CaptureError;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

fn leases() -> &'static Mutex<HashSet<u32>> {
    static LEASES: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();
    LEASES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a camera device, held for the life of a bound session.
///
/// Dropping the lease frees the device for the next controller.
#[derive(Debug)]
pub(crate) struct DeviceLease {
    device_id: u32,
}

impl DeviceLease {
    pub(crate) fn acquire(device_id: u32) -> Result<Self, CaptureError> {
        let mut held = leases()
            .lock()
            .map_err(|_| CaptureError::HardwareCaptureFailure("device lease table poisoned".into()))?;
        if !held.insert(device_id) {
            return Err(CaptureError::DeviceInUse { device_id });
        }
        tracing::debug!(device_id, "Device lease acquired");
        Ok(Self { device_id })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut held = leases()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.device_id);
        tracing::debug!(device_id = self.device_id, "Device lease released");
    }
}
