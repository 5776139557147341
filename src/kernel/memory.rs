use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MemoryConfig, MAX_ADDRESSABLE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("logical address {address:#06x} is outside the {range}-byte addressable range")]
    Unaddressable { address: usize, range: usize },
    #[error("address {physical:#06x} is outside partition {partition} [{base:#06x}, {limit:#06x})")]
    OutOfBounds {
        partition: usize,
        physical: usize,
        base: usize,
        limit: usize,
    },
    #[error("no memory partition {0}")]
    NoSuchPartition(usize),
    #[error("image of {size} bytes does not fit a {capacity}-byte partition")]
    ImageTooLarge { size: usize, capacity: usize },
}

/// Which free partition a new or rolled-in process is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    FirstFit,
    BestFit,
    WorstFit,
}

/// One fixed slice of main memory. `write_enabled` means free: it is cleared
/// the moment a process is placed here and set again once it leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub physical_base: usize,
    pub physical_limit: usize,
    pub capacity: usize,
    pub write_enabled: bool,
}

impl Volume {
    pub fn contains(&self, physical: usize) -> bool {
        (self.physical_base..self.physical_limit).contains(&physical)
    }
}

pub struct MemoryManager {
    data: Vec<u8>,
    volumes: Vec<Volume>,
}

impl MemoryManager {
    /// Splits main memory into equal, non-overlapping partitions.
    pub fn new(config: &MemoryConfig) -> MemoryManager {
        let volumes = (0..config.partitions)
            .map(|partition| Volume {
                physical_base: partition * config.partition_size,
                physical_limit: (partition + 1) * config.partition_size,
                capacity: config.partition_size,
                write_enabled: true,
            })
            .collect();

        MemoryManager {
            data: vec![0; config.partitions * config.partition_size],
            volumes,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volume(&self, partition: usize) -> Result<&Volume, MemoryError> {
        self.volumes.get(partition).ok_or(MemoryError::NoSuchPartition(partition))
    }

    pub fn read_from(&self, physical: usize) -> Option<u8> {
        self.data.get(physical).copied()
    }

    pub fn free_partitions(&self) -> impl Iterator<Item = usize> + '_ {
        self.volumes
            .iter()
            .enumerate()
            .filter(|(_, volume)| volume.write_enabled)
            .map(|(partition, _)| partition)
    }

    pub fn first_fit(&self, size: usize) -> Option<usize> {
        self.free_partitions().find(|&partition| self.volumes[partition].capacity >= size)
    }

    /// Smallest free partition that still fits; ties go to the lowest index.
    pub fn best_fit(&self, size: usize) -> Option<usize> {
        self.fitting(size).fold(None, |best: Option<usize>, partition| match best {
            Some(current) if self.volumes[current].capacity <= self.volumes[partition].capacity => best,
            _ => Some(partition),
        })
    }

    /// Largest free partition; ties go to the lowest index.
    pub fn worst_fit(&self, size: usize) -> Option<usize> {
        self.fitting(size).fold(None, |worst: Option<usize>, partition| match worst {
            Some(current) if self.volumes[current].capacity >= self.volumes[partition].capacity => worst,
            _ => Some(partition),
        })
    }

    pub fn find_partition(&self, placement: Placement, size: usize) -> Option<usize> {
        match placement {
            Placement::FirstFit => self.first_fit(size),
            Placement::BestFit => self.best_fit(size),
            Placement::WorstFit => self.worst_fit(size),
        }
    }

    pub fn write_lock(&mut self, partition: usize) -> Result<(), MemoryError> {
        self.volume_mut(partition)?.write_enabled = false;
        Ok(())
    }

    pub fn write_unlock(&mut self, partition: usize) -> Result<(), MemoryError> {
        self.volume_mut(partition)?.write_enabled = true;
        Ok(())
    }

    /// Copies a process image into a partition, zero-filling the rest of it.
    pub fn load_image(&mut self, partition: usize, image: &[u8]) -> Result<(), MemoryError> {
        let volume = self.volume(partition)?.clone();
        if image.len() > volume.capacity {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                capacity: volume.capacity,
            });
        }
        let slice = &mut self.data[volume.physical_base..volume.physical_limit];
        slice.fill(0);
        slice[..image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn read_image(&self, partition: usize) -> Result<Vec<u8>, MemoryError> {
        let volume = self.volume(partition)?;
        Ok(self.data[volume.physical_base..volume.physical_limit].to_vec())
    }

    pub fn clear(&mut self, partition: usize) -> Result<(), MemoryError> {
        let volume = self.volume(partition)?.clone();
        self.data[volume.physical_base..volume.physical_limit].fill(0);
        Ok(())
    }

    pub(super) fn read_physical(&self, physical: usize) -> u8 {
        self.data[physical]
    }

    pub(super) fn write_physical(&mut self, physical: usize, value: u8) {
        self.data[physical] = value;
    }

    fn fitting(&self, size: usize) -> impl Iterator<Item = usize> + '_ {
        self.free_partitions().filter(move |&partition| self.volumes[partition].capacity >= size)
    }

    fn volume_mut(&mut self, partition: usize) -> Result<&mut Volume, MemoryError> {
        self.volumes.get_mut(partition).ok_or(MemoryError::NoSuchPartition(partition))
    }
}

/// Bounds-checked view of one partition. Logical addresses are offsets from
/// the partition base and must stay below the addressable range.
pub struct MemoryAccessor<'a> {
    memory: &'a mut MemoryManager,
    partition: usize,
}

impl<'a> MemoryAccessor<'a> {
    pub fn new(memory: &'a mut MemoryManager, partition: usize) -> Result<MemoryAccessor<'a>, MemoryError> {
        memory.volume(partition)?;
        Ok(MemoryAccessor { memory, partition })
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn translate(&self, logical: usize) -> Result<usize, MemoryError> {
        if logical >= MAX_ADDRESSABLE {
            return Err(MemoryError::Unaddressable {
                address: logical,
                range: MAX_ADDRESSABLE,
            });
        }
        let volume = self.memory.volume(self.partition)?;
        let physical = logical + volume.physical_base;
        if !volume.contains(physical) {
            return Err(MemoryError::OutOfBounds {
                partition: self.partition,
                physical,
                base: volume.physical_base,
                limit: volume.physical_limit,
            });
        }
        Ok(physical)
    }

    pub fn read(&self, logical: usize) -> Result<u8, MemoryError> {
        let physical = self.translate(logical)?;
        Ok(self.memory.read_physical(physical))
    }

    pub fn write(&mut self, logical: usize, value: u8) -> Result<(), MemoryError> {
        let physical = self.translate(logical)?;
        self.memory.write_physical(physical, value);
        Ok(())
    }
}
