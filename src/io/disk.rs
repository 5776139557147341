use std::collections::HashSet;
use std::ops::Range;

use chrono::{Local, NaiveDateTime};
use log::{debug, warn};
use thiserror::Error;

use super::block::{Block, BlockAddress, DATA_OFFSET, FLAG_FREE, FLAG_RESERVED, NAME_OFFSET};
use super::defragmenter::{self, DefragReport};
use super::id_allocator::IdAllocator;
use crate::config::DiskConfig;

/// Prefix of the hidden files the swapper keeps process images in.
pub const SWAP_PREFIX: &str = ".swap";

const MBR_SIGNATURE: &[u8] = b"TOYOS-MBR";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("disk is not formatted")]
    Unformatted,
    #[error("file name must not be empty")]
    EmptyName,
    #[error("file name '{name}' is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("file '{0}' already exists")]
    AlreadyExists(String),
    #[error("file '{0}' not found")]
    NotFound(String),
    #[error("no deleted file named '{0}'")]
    NothingToRecover(String),
    #[error("'{0}' is a reserved swap file")]
    ReservedFile(String),
    #[error("no free directory block")]
    DirectoryFull,
    #[error("not enough free data blocks: {needed} needed, {available} available")]
    DiskFull { needed: usize, available: usize },
    #[error("no free file id")]
    OutOfIds,
    #[error("file is {size} bytes, at most {max} fit in one file")]
    FileTooLarge { size: usize, max: usize },
    #[error("corrupt chain at block {0}")]
    CorruptChain(BlockAddress),
    #[error("disk image is {actual} bytes, expected {expected}")]
    ImageSize { actual: usize, expected: usize },
}

/// Block geometry. Index order is track-major, so index 0 is `0:0:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub tracks: usize,
    pub sectors: usize,
    pub blocks: usize,
    pub block_size: usize,
    pub directory_tracks: usize,
}

impl Geometry {
    pub fn from_config(config: &DiskConfig) -> Geometry {
        Geometry {
            tracks: config.tracks,
            sectors: config.sectors,
            blocks: config.blocks,
            block_size: config.block_size,
            directory_tracks: config.directory_tracks,
        }
    }

    pub fn total_blocks(&self) -> usize {
        self.tracks * self.sectors * self.blocks
    }

    pub fn index_of(&self, address: BlockAddress) -> Option<usize> {
        let (track, sector, block) = (address.track as usize, address.sector as usize, address.block as usize);
        if track >= self.tracks || sector >= self.sectors || block >= self.blocks {
            return None;
        }
        Some((track * self.sectors + sector) * self.blocks + block)
    }

    pub fn address_of(&self, index: usize) -> BlockAddress {
        let block = index % self.blocks;
        let sector = (index / self.blocks) % self.sectors;
        let track = index / (self.blocks * self.sectors);
        BlockAddress::new(track as u8, sector as u8, block as u8)
    }

    /// Directory blocks, minus the master boot record at `0:0:0`.
    pub fn directory_range(&self) -> Range<usize> {
        1..self.directory_tracks * self.sectors * self.blocks
    }

    pub fn data_range(&self) -> Range<usize> {
        self.directory_tracks * self.sectors * self.blocks..self.total_blocks()
    }

    pub fn payload_size(&self) -> usize {
        self.block_size - DATA_OFFSET
    }

    pub fn name_capacity(&self) -> usize {
        self.block_size - NAME_OFFSET
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub id: u16,
    pub size: u16,
    pub created: Option<NaiveDateTime>,
    pub address: BlockAddress,
}

pub fn is_swap_file(name: &str) -> bool {
    name.starts_with(SWAP_PREFIX)
}

/// The backing store: a flat arena of blocks plus the filesystem that threads
/// files through it as linked chains.
pub struct DiskDriver {
    geometry: Geometry,
    pub(super) blocks: Vec<Block>,
    ids: IdAllocator,
    formatted: bool,
}

impl DiskDriver {
    pub fn new(config: &DiskConfig) -> DiskDriver {
        let geometry = Geometry::from_config(config);
        let blank = Block::new(geometry.block_size);
        DiskDriver {
            geometry,
            blocks: vec![blank; geometry.total_blocks()],
            ids: IdAllocator::new(),
            formatted: false,
        }
    }

    /// Rebuilds a driver from raw block bytes. The id pools are reconstructed
    /// from the block flags.
    pub fn from_image(config: &DiskConfig, image: &[u8]) -> Result<DiskDriver, DiskError> {
        let mut disk = DiskDriver::new(config);
        let expected = disk.geometry.total_blocks() * disk.geometry.block_size;
        if image.len() != expected {
            return Err(DiskError::ImageSize {
                actual: image.len(),
                expected,
            });
        }

        disk.blocks = image
            .chunks(disk.geometry.block_size)
            .map(Block::from_bytes)
            .collect();
        disk.formatted = disk.blocks[0].payload().starts_with(MBR_SIGNATURE);
        if disk.formatted {
            for block in &disk.blocks[1..] {
                let flag = block.flag();
                if flag != FLAG_FREE && flag != FLAG_RESERVED {
                    disk.ids.claim(flag);
                }
            }
        }
        Ok(disk)
    }

    pub fn to_image(&self) -> Vec<u8> {
        self.blocks.iter().flat_map(|block| block.as_bytes().iter().copied()).collect()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn is_formatted(&self) -> bool {
        self.formatted
    }

    pub fn block(&self, address: BlockAddress) -> Option<&Block> {
        self.geometry.index_of(address).map(|index| &self.blocks[index])
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// A quick format only rewrites block headers; a full one zero-fills every block.
    pub fn format(&mut self, quick: bool) {
        for block in self.blocks.iter_mut() {
            if quick {
                block.reset(FLAG_FREE);
            } else {
                block.clear(FLAG_FREE);
            }
        }
        let mbr = &mut self.blocks[0];
        mbr.clear(FLAG_RESERVED);
        mbr.set_payload(MBR_SIGNATURE);

        self.ids = IdAllocator::new();
        self.formatted = true;
        debug!("disk formatted ({} format)", if quick { "quick" } else { "full" });
    }

    pub fn create(&mut self, name: &str) -> Result<u16, DiskError> {
        reject_reserved(name)?;
        self.create_entry(name)
    }

    /// Creates a hidden swap file holding `data` in one step; nothing is left
    /// behind if the data does not fit.
    pub fn create_swap(&mut self, name: &str, data: &[u8]) -> Result<(), DiskError> {
        self.create_entry(name)?;
        if let Err(err) = self.write_entry(name, data) {
            self.erase(name)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<(), DiskError> {
        reject_reserved(name)?;
        self.write_entry(name, data)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, DiskError> {
        self.ensure_formatted()?;
        let directory = self.find_file(name).ok_or_else(|| DiskError::NotFound(name.to_string()))?;
        let size = self.blocks[directory].size() as usize;

        let mut data = Vec::with_capacity(size);
        for index in self.chain(directory)? {
            data.extend_from_slice(self.blocks[index].payload());
        }
        data.truncate(size);
        Ok(data)
    }

    /// Tombstones the file so it can be recovered later.
    pub fn delete(&mut self, name: &str) -> Result<(), DiskError> {
        reject_reserved(name)?;
        self.ensure_formatted()?;
        let directory = self.find_file(name).ok_or_else(|| DiskError::NotFound(name.to_string()))?;
        let chain = self.chain(directory)?;
        let id = self.blocks[directory].flag();

        match self.ids.allocate_negative() {
            Some(tombstone) => {
                for index in std::iter::once(directory).chain(chain) {
                    self.blocks[index].set_flag(tombstone);
                }
            }
            None => {
                warn!("no tombstone id left, erasing '{}' outright", name);
                for index in std::iter::once(directory).chain(chain) {
                    self.blocks[index].clear(FLAG_FREE);
                }
            }
        }
        self.ids.release(id);
        Ok(())
    }

    /// Removes a file without leaving a tombstone. Used for swap files.
    pub fn erase(&mut self, name: &str) -> Result<(), DiskError> {
        self.ensure_formatted()?;
        let directory = self.find_file(name).ok_or_else(|| DiskError::NotFound(name.to_string()))?;
        let chain = self.chain(directory)?;
        let id = self.blocks[directory].flag();

        for index in std::iter::once(directory).chain(chain) {
            self.blocks[index].clear(FLAG_FREE);
        }
        self.ids.release(id);
        Ok(())
    }

    /// Brings a tombstoned file back under a fresh id. If a live file has
    /// taken its name meanwhile, the recovered file gets a numbered suffix.
    /// Returns the name the file was recovered under.
    pub fn recover(&mut self, name: &str) -> Result<String, DiskError> {
        reject_reserved(name)?;
        self.ensure_formatted()?;
        let directory = self
            .find_tombstoned(name)
            .ok_or_else(|| DiskError::NothingToRecover(name.to_string()))?;
        let chain = self.chain(directory)?;
        let recovered_name = self.unused_name(name)?;
        let id = self.ids.allocate_positive().ok_or(DiskError::OutOfIds)?;
        let tombstone = self.blocks[directory].flag();

        for index in std::iter::once(directory).chain(chain) {
            self.blocks[index].set_flag(id);
        }
        self.blocks[directory].set_name(&recovered_name);
        self.ids.release(tombstone);
        Ok(recovered_name)
    }

    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), DiskError> {
        reject_reserved(name)?;
        reject_reserved(new_name)?;
        self.ensure_formatted()?;
        self.validate_name(new_name)?;
        let directory = self.find_file(name).ok_or_else(|| DiskError::NotFound(name.to_string()))?;
        if name != new_name && self.find_file(new_name).is_some() {
            return Err(DiskError::AlreadyExists(new_name.to_string()));
        }
        self.blocks[directory].set_name(new_name);
        Ok(())
    }

    pub fn copy(&mut self, name: &str, new_name: &str) -> Result<(), DiskError> {
        reject_reserved(name)?;
        reject_reserved(new_name)?;
        let data = self.read(name)?;
        self.create_entry(new_name)?;
        if let Err(err) = self.write_entry(new_name, &data) {
            self.erase(new_name)?;
            return Err(err);
        }
        Ok(())
    }

    /// Live files in directory order. Hidden files (leading `.`) only with `all`.
    pub fn list(&self, all: bool) -> Result<Vec<FileInfo>, DiskError> {
        self.ensure_formatted()?;
        Ok(self
            .geometry
            .directory_range()
            .filter(|&index| self.blocks[index].is_live())
            .map(|index| {
                let block = &self.blocks[index];
                FileInfo {
                    name: block.name(),
                    id: block.flag(),
                    size: block.size(),
                    created: block.date(),
                    address: self.geometry.address_of(index),
                }
            })
            .filter(|info| all || !info.name.starts_with('.'))
            .collect())
    }

    pub fn defragment(&mut self) -> Result<DefragReport, DiskError> {
        self.ensure_formatted()?;
        defragmenter::defragment(self)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.formatted && self.find_file(name).is_some()
    }

    pub fn available_data_blocks(&self) -> usize {
        self.geometry
            .data_range()
            .filter(|&index| self.blocks[index].is_available())
            .count()
    }

    /// Walks every chain, bounded by the block count, and checks that chains
    /// are disjoint and that the ids on disk match the allocator.
    pub fn check_integrity(&self) -> Result<(), DiskError> {
        self.ensure_formatted()?;
        let mut owned = HashSet::new();
        let mut live_ids = HashSet::new();

        for directory in self.geometry.directory_range() {
            let block = &self.blocks[directory];
            if block.is_free() {
                continue;
            }
            if block.is_live() {
                live_ids.insert(block.flag());
            }
            for index in self.chain(directory)? {
                if !owned.insert(index) {
                    return Err(DiskError::CorruptChain(self.geometry.address_of(index)));
                }
            }
        }

        let used: HashSet<u16> = self.ids.used_positive().collect();
        let tombstones: HashSet<u16> = self
            .blocks
            .iter()
            .map(Block::flag)
            .filter(|&flag| IdAllocator::is_negative(flag))
            .collect();
        if used != live_ids
            || tombstones.iter().any(|&flag| !self.ids.is_used(flag))
            || self.ids.used_negative().count() != tombstones.len()
        {
            return Err(DiskError::CorruptChain(BlockAddress::new(0, 0, 0)));
        }
        Ok(())
    }

    fn create_entry(&mut self, name: &str) -> Result<u16, DiskError> {
        self.ensure_formatted()?;
        self.validate_name(name)?;
        if self.find_file(name).is_some() {
            return Err(DiskError::AlreadyExists(name.to_string()));
        }

        let directory = self
            .first_available(self.geometry.directory_range())
            .ok_or(DiskError::DirectoryFull)?;
        // A tombstoned directory block frees its whole chain when reclaimed,
        // so it always brings a data block with it.
        if !self.blocks[directory].is_tombstoned() && self.available_data_blocks() == 0 {
            return Err(DiskError::DiskFull { needed: 1, available: 0 });
        }
        let id = self.ids.allocate_positive().ok_or(DiskError::OutOfIds)?;

        self.reclaim(directory);
        let data = match self.first_available(self.geometry.data_range()) {
            Some(index) => index,
            None => {
                self.ids.release(id);
                return Err(DiskError::DiskFull { needed: 1, available: 0 });
            }
        };
        self.reclaim(data);

        let directory_address = self.geometry.address_of(directory);
        let data_address = self.geometry.address_of(data);

        let entry = &mut self.blocks[directory];
        entry.clear(id);
        entry.set_pointer(Some(data_address));
        entry.set_date(Local::now().naive_local());
        entry.set_size(0);
        entry.set_name(name);

        let body = &mut self.blocks[data];
        body.clear(id);
        body.set_pointer(Some(directory_address));

        debug!("created '{}' with id {} at {}", name, id, directory_address);
        Ok(id)
    }

    fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<(), DiskError> {
        self.ensure_formatted()?;
        let directory = self.find_file(name).ok_or_else(|| DiskError::NotFound(name.to_string()))?;
        let payload_size = self.geometry.payload_size();
        if data.len() > u16::MAX as usize {
            return Err(DiskError::FileTooLarge {
                size: data.len(),
                max: u16::MAX as usize,
            });
        }

        let mut chain = self.chain(directory)?;
        let needed = data.len().div_ceil(payload_size).max(1);

        if needed > chain.len() {
            let extra = needed - chain.len();
            let available = self.available_data_blocks();
            if available < extra {
                return Err(DiskError::DiskFull { needed: extra, available });
            }
            let id = self.blocks[directory].flag();
            for _ in 0..extra {
                let index = self
                    .first_available(self.geometry.data_range())
                    .ok_or(DiskError::DiskFull { needed: extra, available: 0 })?;
                self.reclaim(index);
                self.blocks[index].set_flag(id);
                chain.push(index);
            }
        } else if needed < chain.len() {
            // The cut tail is zeroed under a tombstone of its own, so it is
            // handed out again only after every free block.
            let tombstone = self.ids.allocate_negative().unwrap_or(FLAG_FREE);
            for index in chain.drain(needed..) {
                self.blocks[index].clear(tombstone);
            }
        }

        let directory_address = self.geometry.address_of(directory);
        let mut chunks = data.chunks(payload_size);
        for (position, &index) in chain.iter().enumerate() {
            let next = chain
                .get(position + 1)
                .map(|&next| self.geometry.address_of(next))
                .unwrap_or(directory_address);
            let block = &mut self.blocks[index];
            block.set_pointer(Some(next));
            block.set_payload(chunks.next().unwrap_or(&[]));
        }
        self.blocks[directory].set_pointer(Some(self.geometry.address_of(chain[0])));
        self.blocks[directory].set_size(data.len() as u16);
        Ok(())
    }

    /// Prepares an available block for reuse. A tombstoned data block is first
    /// spliced out of the deleted chain that still links to it; a tombstoned
    /// directory block takes its whole deleted file with it. The tombstone id
    /// goes back to the allocator once no block carries it.
    fn reclaim(&mut self, index: usize) {
        let flag = self.blocks[index].flag();
        if !IdAllocator::is_negative(flag) {
            self.blocks[index].clear(FLAG_FREE);
            return;
        }

        if self.geometry.directory_range().contains(&index) {
            self.purge_tombstone(flag);
            return;
        }

        if let Some(previous) = self.find_previous_block(index) {
            let next = self.blocks[index].pointer();
            let previous_address = self.geometry.address_of(previous);
            if self.geometry.directory_range().contains(&previous) && next == Some(previous_address) {
                // Last data block of a deleted file: nothing left to recover.
                self.purge_tombstone(flag);
                return;
            }
            self.blocks[previous].set_pointer(next);
        }
        self.blocks[index].clear(FLAG_FREE);
        if !self.blocks.iter().any(|block| block.flag() == flag) {
            self.ids.release(flag);
        }
    }

    fn purge_tombstone(&mut self, tombstone: u16) {
        for block in self.blocks.iter_mut().filter(|block| block.flag() == tombstone) {
            block.clear(FLAG_FREE);
        }
        self.ids.release(tombstone);
    }

    /// The block in the same chain whose forward pointer targets `index`.
    pub(super) fn find_previous_block(&self, index: usize) -> Option<usize> {
        let flag = self.blocks[index].flag();
        let address = self.geometry.address_of(index);
        (0..self.blocks.len()).find(|&candidate| {
            candidate != index
                && self.blocks[candidate].flag() == flag
                && self.blocks[candidate].pointer() == Some(address)
        })
    }

    /// Data block indices of the file headed by `directory`, in order. The walk
    /// stops at the block pointing back at the directory entry and gives up
    /// after visiting every block once.
    pub(super) fn chain(&self, directory: usize) -> Result<Vec<usize>, DiskError> {
        let flag = self.blocks[directory].flag();
        let directory_address = self.geometry.address_of(directory);
        let mut chain = Vec::new();
        let mut current = self.blocks[directory].pointer();

        while current != Some(directory_address) {
            let corrupt = DiskError::CorruptChain(current.unwrap_or(directory_address));
            let address = current.ok_or_else(|| corrupt.clone())?;
            let index = self.geometry.index_of(address).ok_or_else(|| corrupt.clone())?;
            if !self.geometry.data_range().contains(&index)
                || self.blocks[index].flag() != flag
                || chain.len() >= self.geometry.data_range().len()
            {
                return Err(corrupt);
            }
            chain.push(index);
            current = self.blocks[index].pointer();
        }

        if chain.is_empty() {
            return Err(DiskError::CorruptChain(directory_address));
        }
        Ok(chain)
    }

    fn find_file(&self, name: &str) -> Option<usize> {
        self.geometry
            .directory_range()
            .find(|&index| self.blocks[index].is_live() && self.blocks[index].name() == name)
    }

    fn find_tombstoned(&self, name: &str) -> Option<usize> {
        self.geometry
            .directory_range()
            .find(|&index| self.blocks[index].is_tombstoned() && self.blocks[index].name() == name)
    }

    /// Free blocks first, so deleted files stay recoverable as long as possible.
    fn first_available(&self, range: Range<usize>) -> Option<usize> {
        range
            .clone()
            .find(|&index| self.blocks[index].is_free())
            .or_else(|| range.into_iter().find(|&index| self.blocks[index].is_tombstoned()))
    }

    fn unused_name(&self, name: &str) -> Result<String, DiskError> {
        if self.find_file(name).is_none() {
            return Ok(name.to_string());
        }
        let capacity = self.geometry.name_capacity();
        for copy in 1..u16::MAX {
            let suffix = format!("({})", copy);
            let mut stem = name.to_string();
            while stem.len() + suffix.len() > capacity {
                stem.pop();
            }
            let candidate = format!("{}{}", stem, suffix);
            if self.find_file(&candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(DiskError::AlreadyExists(name.to_string()))
    }

    fn validate_name(&self, name: &str) -> Result<(), DiskError> {
        if name.is_empty() {
            return Err(DiskError::EmptyName);
        }
        let max = self.geometry.name_capacity();
        if name.len() > max || name.as_bytes().contains(&0) {
            return Err(DiskError::NameTooLong {
                name: name.to_string(),
                max,
            });
        }
        Ok(())
    }

    fn ensure_formatted(&self) -> Result<(), DiskError> {
        if self.formatted {
            Ok(())
        } else {
            Err(DiskError::Unformatted)
        }
    }
}

fn reject_reserved(name: &str) -> Result<(), DiskError> {
    if is_swap_file(name) {
        Err(DiskError::ReservedFile(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted_disk() -> DiskDriver {
        let mut disk = DiskDriver::new(&DiskConfig::default());
        disk.format(false);
        disk
    }

    #[test]
    fn test_disk_unformatted_rejects_operations() {
        let mut disk = DiskDriver::new(&DiskConfig::default());
        assert_eq!(disk.create("f"), Err(DiskError::Unformatted));
        assert_eq!(disk.read("f"), Err(DiskError::Unformatted));
        assert_eq!(disk.list(false), Err(DiskError::Unformatted));
        assert!(!disk.exists("f"));
    }

    #[test]
    fn test_disk_geometry_addresses() {
        let disk = formatted_disk();
        let geometry = disk.geometry();
        assert_eq!(geometry.total_blocks(), 256);
        assert_eq!(geometry.directory_range(), 1..64);
        assert_eq!(geometry.data_range(), 64..256);
        assert_eq!(geometry.address_of(64), BlockAddress::new(1, 0, 0));
        assert_eq!(geometry.index_of(BlockAddress::new(3, 7, 7)), Some(255));
        assert_eq!(geometry.index_of(BlockAddress::new(4, 0, 0)), None);
    }

    #[test]
    fn test_disk_create_write_read() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"hello").unwrap();
        assert_eq!(disk.read("f").unwrap(), b"hello");
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_create_duplicate_name() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        assert_eq!(disk.create("f"), Err(DiskError::AlreadyExists("f".into())));
    }

    #[test]
    fn test_disk_create_rejects_bad_names() {
        let mut disk = formatted_disk();
        assert_eq!(disk.create(""), Err(DiskError::EmptyName));
        assert!(matches!(disk.create(&"n".repeat(50)), Err(DiskError::NameTooLong { .. })));
        assert_eq!(disk.create(".swap1"), Err(DiskError::ReservedFile(".swap1".into())));
    }

    #[test]
    fn test_disk_new_file_points_back_at_directory() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        let directory = disk.block(BlockAddress::new(0, 0, 1)).unwrap();
        assert_eq!(directory.name(), "f");
        let data_address = directory.pointer().unwrap();
        assert_eq!(data_address, BlockAddress::new(1, 0, 0));
        let data = disk.block(data_address).unwrap();
        assert_eq!(data.pointer(), Some(BlockAddress::new(0, 0, 1)));
    }

    #[test]
    fn test_disk_write_grows_and_shrinks_chain() {
        let mut disk = formatted_disk();
        let free_before = disk.available_data_blocks();
        disk.create("big").unwrap();

        let long: Vec<u8> = (0..200u8).collect();
        disk.write("big", &long).unwrap();
        assert_eq!(disk.read("big").unwrap(), long);
        assert_eq!(disk.available_data_blocks(), free_before - 4);

        disk.write("big", b"short").unwrap();
        assert_eq!(disk.read("big").unwrap(), b"short");
        assert_eq!(disk.available_data_blocks(), free_before - 1);
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_write_empty_keeps_one_block() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"").unwrap();
        assert_eq!(disk.read("f").unwrap(), b"");
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_write_too_large_leaves_file_untouched() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"original").unwrap();
        let free_before = disk.available_data_blocks();

        let huge = vec![7u8; disk.geometry().payload_size() * 200];
        let result = disk.write("f", &huge);

        assert!(matches!(result, Err(DiskError::DiskFull { .. })));
        assert_eq!(disk.read("f").unwrap(), b"original");
        assert_eq!(disk.available_data_blocks(), free_before);
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_delete_then_read_not_found() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.delete("f").unwrap();
        assert_eq!(disk.read("f"), Err(DiskError::NotFound("f".into())));
        assert_eq!(disk.delete("f"), Err(DiskError::NotFound("f".into())));
        assert_eq!(disk.ids().used_positive().count(), 0);
        assert_eq!(disk.ids().used_negative().count(), 1);
    }

    #[test]
    fn test_disk_tombstone_reuse() {
        let mut disk = DiskDriver::new(&DiskConfig {
            tracks: 2,
            sectors: 1,
            blocks: 2,
            ..DiskConfig::default()
        });
        disk.format(false);
        // One usable directory block and two data blocks: "g" must reuse f's blocks.
        disk.create("f").unwrap();
        disk.write("f", &[1u8; 100]).unwrap();
        disk.delete("f").unwrap();

        disk.create("g").unwrap();
        disk.write("g", b"x").unwrap();

        assert_eq!(disk.read("g").unwrap(), b"x");
        assert_eq!(disk.read("f"), Err(DiskError::NotFound("f".into())));
        assert_eq!(disk.recover("f"), Err(DiskError::NothingToRecover("f".into())));
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_reusing_tombstoned_data_block_splices_deleted_chain() {
        let mut disk = DiskDriver::new(&DiskConfig {
            tracks: 2,
            sectors: 1,
            blocks: 3,
            ..DiskConfig::default()
        });
        disk.format(false);
        disk.create("f").unwrap();
        disk.write("f", &[5u8; 100]).unwrap();
        disk.create("pad").unwrap();
        disk.delete("f").unwrap();

        // No free data block is left, so growing "pad" must take one of f's.
        disk.write("pad", &[9u8; 100]).unwrap();
        assert_eq!(disk.read("pad").unwrap(), vec![9u8; 100]);
        disk.check_integrity().unwrap();
    }

    fn small_disk() -> DiskDriver {
        // Three directory blocks and four data blocks.
        let mut disk = DiskDriver::new(&DiskConfig {
            tracks: 2,
            sectors: 1,
            blocks: 4,
            ..DiskConfig::default()
        });
        disk.format(false);
        disk
    }

    #[test]
    fn test_disk_reusing_last_block_of_deleted_file_purges_it() {
        let mut disk = small_disk();
        disk.create("a").unwrap();
        disk.write("a", &[1u8; 150]).unwrap();
        disk.create("f").unwrap();
        disk.delete("f").unwrap();

        // f's only data block is the last one available.
        assert_eq!(disk.create("g"), Ok(2));
        assert_eq!(disk.read("g").unwrap(), b"");
        assert_eq!(disk.read("a").unwrap(), vec![1u8; 150]);
        assert_eq!(disk.recover("f"), Err(DiskError::NothingToRecover("f".into())));
        assert_eq!(disk.ids().used_positive().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(disk.ids().used_negative().count(), 0);
        disk.check_integrity().unwrap();
        disk.defragment().unwrap();
    }

    #[test]
    fn test_disk_growth_consumes_whole_deleted_chain() {
        let mut disk = small_disk();
        disk.create("a").unwrap();
        disk.create("f").unwrap();
        disk.write("f", &[2u8; 100]).unwrap();
        disk.delete("f").unwrap();

        // One free block, then both of f's blocks in chain order.
        disk.write("a", &[3u8; 200]).unwrap();
        assert_eq!(disk.read("a").unwrap(), vec![3u8; 200]);
        assert_eq!(disk.recover("f"), Err(DiskError::NothingToRecover("f".into())));
        assert_eq!(disk.ids().used_negative().count(), 0);
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_shrinking_write_tombstones_and_zeroes_tail() {
        let mut disk = small_disk();
        disk.create("f").unwrap();
        disk.write("f", &[1u8; 150]).unwrap();
        disk.write("f", b"x").unwrap();
        assert_eq!(disk.read("f").unwrap(), b"x");

        for address in [BlockAddress::new(1, 0, 1), BlockAddress::new(1, 0, 2)] {
            let block = disk.block(address).unwrap();
            assert!(block.is_tombstoned());
            assert_eq!(block.pointer(), None);
            assert!(block.payload().iter().all(|&byte| byte == 0));
        }
        assert_eq!(disk.ids().used_negative().count(), 1);
        disk.check_integrity().unwrap();

        // The free block goes to g; f must grow back into its old tail.
        disk.create("g").unwrap();
        disk.write("f", &[2u8; 150]).unwrap();
        assert_eq!(disk.read("f").unwrap(), vec![2u8; 150]);
        assert_eq!(disk.read("g").unwrap(), b"");
        assert_eq!(disk.ids().used_negative().count(), 0);
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_delete_then_recover() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"keep me").unwrap();
        disk.delete("f").unwrap();

        assert_eq!(disk.recover("f").unwrap(), "f");
        assert_eq!(disk.read("f").unwrap(), b"keep me");
        assert_eq!(disk.ids().used_negative().count(), 0);
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_recover_renames_on_collision() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"old").unwrap();
        disk.delete("f").unwrap();
        disk.create("f").unwrap();
        disk.write("f", b"new").unwrap();

        assert_eq!(disk.recover("f").unwrap(), "f(1)");
        assert_eq!(disk.read("f").unwrap(), b"new");
        assert_eq!(disk.read("f(1)").unwrap(), b"old");
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_rename() {
        let mut disk = formatted_disk();
        disk.create("a").unwrap();
        disk.create("b").unwrap();
        disk.write("a", b"payload").unwrap();

        assert_eq!(disk.rename("a", "b"), Err(DiskError::AlreadyExists("b".into())));
        assert_eq!(disk.rename("a", ".swap3"), Err(DiskError::ReservedFile(".swap3".into())));
        disk.rename("a", "c").unwrap();
        assert_eq!(disk.read("c").unwrap(), b"payload");
        assert_eq!(disk.read("a"), Err(DiskError::NotFound("a".into())));
    }

    #[test]
    fn test_disk_copy() {
        let mut disk = formatted_disk();
        disk.create("a").unwrap();
        disk.write("a", &[3u8; 150]).unwrap();
        disk.copy("a", "b").unwrap();

        assert_eq!(disk.read("b").unwrap(), vec![3u8; 150]);
        assert_eq!(disk.copy("a", "b"), Err(DiskError::AlreadyExists("b".into())));
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_copy_without_room_leaves_no_file() {
        let mut disk = DiskDriver::new(&DiskConfig {
            tracks: 2,
            sectors: 1,
            blocks: 4,
            ..DiskConfig::default()
        });
        disk.format(false);
        disk.create("a").unwrap();
        disk.write("a", &[1u8; 150]).unwrap();

        assert!(matches!(disk.copy("a", "b"), Err(DiskError::DiskFull { .. })));
        assert!(!disk.exists("b"));
        disk.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_swap_files_are_hidden_and_protected() {
        let mut disk = formatted_disk();
        disk.create_swap(".swap0", b"image").unwrap();
        disk.create("visible").unwrap();

        let names: Vec<String> = disk.list(false).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["visible".to_string()]);
        assert_eq!(disk.list(true).unwrap().len(), 2);

        assert_eq!(disk.delete(".swap0"), Err(DiskError::ReservedFile(".swap0".into())));
        assert_eq!(disk.copy(".swap0", "x"), Err(DiskError::ReservedFile(".swap0".into())));
        assert_eq!(disk.read(".swap0").unwrap(), b"image");

        disk.erase(".swap0").unwrap();
        assert!(!disk.exists(".swap0"));
        assert_eq!(disk.ids().used_negative().count(), 0);
    }

    #[test]
    fn test_disk_directory_full() {
        let mut disk = DiskDriver::new(&DiskConfig {
            tracks: 2,
            sectors: 1,
            blocks: 3,
            ..DiskConfig::default()
        });
        disk.format(false);
        disk.create("a").unwrap();
        disk.create("b").unwrap();
        assert_eq!(disk.create("c"), Err(DiskError::DirectoryFull));
    }

    #[test]
    fn test_disk_list_reports_size_and_date() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.write("f", b"12345").unwrap();
        let files = disk.list(false).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 5);
        assert!(files[0].created.is_some());
    }

    #[test]
    fn test_disk_quick_format_forgets_files() {
        let mut disk = formatted_disk();
        disk.create("f").unwrap();
        disk.format(true);
        assert!(!disk.exists("f"));
        assert_eq!(disk.available_data_blocks(), disk.geometry().data_range().len());
    }

    #[test]
    fn test_disk_image_round_trip_rebuilds_pools() {
        let mut disk = formatted_disk();
        disk.create("a").unwrap();
        disk.write("a", b"persisted").unwrap();
        disk.create("b").unwrap();
        disk.delete("b").unwrap();

        let restored = DiskDriver::from_image(&DiskConfig::default(), &disk.to_image()).unwrap();
        assert!(restored.is_formatted());
        assert_eq!(restored.read("a").unwrap(), b"persisted");
        assert_eq!(restored.ids().used_positive().collect::<Vec<_>>(), vec![1]);
        assert_eq!(restored.ids().used_negative().count(), 1);
        restored.check_integrity().unwrap();
    }

    #[test]
    fn test_disk_image_wrong_size() {
        let result = DiskDriver::from_image(&DiskConfig::default(), &[0; 10]);
        assert!(matches!(result, Err(DiskError::ImageSize { .. })));
    }
}
