//! Disk-space governor: flips mining into upload-only mode when free
//! space runs low.

/// Hysteresis latch over the low-water free-space threshold.
///
/// The free-space reading is advisory (it races with engine writes);
/// the governor only reacts to threshold crossings, so an unchanged
/// reading never produces engine calls.
#[derive(Debug)]
pub struct DiskGovernor {
    low_water_bytes: u64,
    upload_only: bool,
}

impl DiskGovernor {
    pub fn new(low_water_bytes: u64) -> Self {
        Self {
            low_water_bytes,
            upload_only: false,
        }
    }

    /// Feed one free-space reading. Returns the new mode on a
    /// crossing, `None` when nothing changed.
    pub fn observe(&mut self, free_bytes: u64) -> Option<bool> {
        let low = free_bytes < self.low_water_bytes;
        if low == self.upload_only {
            return None;
        }
        self.upload_only = low;
        Some(low)
    }

    /// Whether mining is currently upload-only.
    pub fn upload_only(&self) -> bool {
        self.upload_only
    }
}
