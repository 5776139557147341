use log::debug;

use super::block::FLAG_FREE;
use super::disk::{DiskDriver, DiskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefragReport {
    /// Blocks that changed position.
    pub moved: usize,
    /// Live data blocks, now packed at the front of the data partition.
    pub live_blocks: usize,
}

/// Live blocks sort before free and tombstoned ones: their flags are the only
/// values below `FLAG_FREE` that can appear in the data partition.
fn is_packed(flag: u16) -> bool {
    flag < FLAG_FREE
}

/// Packs live data blocks toward the front of the data partition with a
/// two-way, in-place partition on the block flag. Each swap repoints both
/// blocks' predecessors first, so no chain ever points at a moved block's old
/// position.
pub(super) fn defragment(disk: &mut DiskDriver) -> Result<DefragReport, DiskError> {
    disk.check_integrity()?;

    let range = disk.geometry().data_range();
    let live_blocks = range.clone().filter(|&index| disk.blocks[index].is_live()).count();
    let (mut left, mut right) = (range.start, range.end - 1);
    let mut moved = 0;

    loop {
        while left < right && is_packed(disk.blocks[left].flag()) {
            left += 1;
        }
        while left < right && !is_packed(disk.blocks[right].flag()) {
            right -= 1;
        }
        if left >= right {
            break;
        }

        swap_blocks(disk, left, right)?;
        moved += 2;
        left += 1;
        right -= 1;
    }

    debug!("defragmented: {} blocks moved, {} live", moved, live_blocks);
    Ok(DefragReport { moved, live_blocks })
}

/// Swaps a live block at `live` into the hole at `hole`.
fn swap_blocks(disk: &mut DiskDriver, hole: usize, live: usize) -> Result<(), DiskError> {
    let geometry = *disk.geometry();
    let live_previous = disk
        .find_previous_block(live)
        .ok_or_else(|| DiskError::CorruptChain(geometry.address_of(live)))?;
    let hole_previous = if disk.blocks[hole].is_tombstoned() {
        disk.find_previous_block(hole)
    } else {
        None
    };

    disk.blocks[live_previous].set_pointer(Some(geometry.address_of(hole)));
    if let Some(previous) = hole_previous {
        disk.blocks[previous].set_pointer(Some(geometry.address_of(live)));
    }
    disk.blocks.swap(hole, live);
    Ok(())
}
