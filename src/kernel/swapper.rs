use log::debug;
use thiserror::Error;

use super::memory::{MemoryError, MemoryManager};
use super::{Location, Pid, ProcessControlBlock};
use crate::io::disk::SWAP_PREFIX;
use crate::io::{DiskDriver, DiskError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwapError {
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("process {0} is not in memory")]
    NotInMemory(Pid),
    #[error("process {0} is not on the backing store")]
    NotOnBackingStore(Pid),
    #[error("swap file '{0}' does not hold a process image")]
    CorruptImage(String),
    #[error("no memory partition can be freed for process {0}")]
    NoRoom(Pid),
}

pub fn swap_file_name(pid: Pid) -> String {
    format!("{}{}", SWAP_PREFIX, pid)
}

/// Moves process images between memory partitions and hidden swap files.
/// Images are stored as hex text. A PCB's location is only updated once the
/// disk side of the move has succeeded.
pub struct Swapper;

impl Swapper {
    /// Writes a fresh image straight to the backing store.
    pub fn store(pid: Pid, image: &[u8], disk: &mut DiskDriver) -> Result<String, SwapError> {
        let name = swap_file_name(pid);
        disk.create_swap(&name, hex::encode(image).as_bytes())?;
        Ok(name)
    }

    pub fn roll_out(
        pcb: &mut ProcessControlBlock,
        memory: &mut MemoryManager,
        disk: &mut DiskDriver,
    ) -> Result<(), SwapError> {
        let pid = pcb.get_pid();
        let partition = pcb.partition().ok_or(SwapError::NotInMemory(pid))?;
        let image = memory.read_image(partition)?;

        let name = Swapper::store(pid, &image, disk)?;
        memory.write_unlock(partition)?;
        debug!("rolled pid {} out of partition {} to {}", pid, partition, name);
        pcb.location = Location::BackingStore(name);
        Ok(())
    }

    pub fn roll_in(
        pcb: &mut ProcessControlBlock,
        partition: usize,
        memory: &mut MemoryManager,
        disk: &mut DiskDriver,
    ) -> Result<(), SwapError> {
        let pid = pcb.get_pid();
        let name = pcb.swap_file().ok_or(SwapError::NotOnBackingStore(pid))?.to_string();
        let image = Swapper::load(&name, disk)?;

        memory.load_image(partition, &image)?;
        memory.write_lock(partition)?;
        if let Err(err) = disk.erase(&name) {
            memory.write_unlock(partition)?;
            return Err(err.into());
        }
        debug!("rolled pid {} in from {} to partition {}", pid, name, partition);
        pcb.location = Location::Memory(partition);
        Ok(())
    }

    /// Gives back whatever storage the process holds.
    pub fn release(
        pcb: &mut ProcessControlBlock,
        memory: &mut MemoryManager,
        disk: &mut DiskDriver,
    ) -> Result<(), SwapError> {
        match &pcb.location {
            Location::Memory(partition) => memory.write_unlock(*partition)?,
            Location::BackingStore(name) => disk.erase(name)?,
            Location::Released => {}
        }
        pcb.location = Location::Released;
        Ok(())
    }

    /// The process image wherever it currently lives.
    pub fn image(pcb: &ProcessControlBlock, memory: &MemoryManager, disk: &DiskDriver) -> Result<Vec<u8>, SwapError> {
        match &pcb.location {
            Location::Memory(partition) => Ok(memory.read_image(*partition)?),
            Location::BackingStore(name) => Swapper::load(name, disk),
            Location::Released => Err(SwapError::NotInMemory(pcb.get_pid())),
        }
    }

    fn load(name: &str, disk: &DiskDriver) -> Result<Vec<u8>, SwapError> {
        let text = disk.read(name)?;
        hex::decode(text).map_err(|_| SwapError::CorruptImage(name.to_string()))
    }
}
