use std::fmt;
use std::ops::Range;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::id_allocator::IdAllocator;

/// Flag of the master boot record and any other block the filesystem must never hand out.
pub const FLAG_RESERVED: u16 = 0x0000;
pub const FLAG_FREE: u16 = 0x8000;

const FLAG: Range<usize> = 0..2;
const POINTER: Range<usize> = 2..5;
const DATE: Range<usize> = 5..13;
const SIZE: Range<usize> = 13..15;
pub const NAME_OFFSET: usize = 15;
pub const DATA_OFFSET: usize = 5;

const NULL_POINTER: [u8; 3] = [0xFF; 3];

/// Track/sector/block triple, the on-disk form of a forward pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress {
    pub track: u8,
    pub sector: u8,
    pub block: u8,
}

impl BlockAddress {
    pub fn new(track: u8, sector: u8, block: u8) -> BlockAddress {
        BlockAddress { track, sector, block }
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.track, self.sector, self.block)
    }
}

/// One fixed-size block record. The bytes are the source of truth; the
/// accessors only decode and encode the layout.
///
/// ```text
/// [0:2)  flag/id        [2:5)  forward pointer
/// directory: [5:13) creation date, [13:15) size, [15:..) name
/// data:      [5:..) payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    bytes: Vec<u8>,
}

impl Block {
    pub fn new(size: usize) -> Block {
        let mut block = Block { bytes: vec![0; size] };
        block.reset(FLAG_FREE);
        block
    }

    pub fn from_bytes(bytes: &[u8]) -> Block {
        Block { bytes: bytes.to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn flag(&self) -> u16 {
        u16::from_be_bytes([self.bytes[FLAG.start], self.bytes[FLAG.start + 1]])
    }

    pub fn set_flag(&mut self, flag: u16) {
        self.bytes[FLAG].copy_from_slice(&flag.to_be_bytes());
    }

    pub fn is_free(&self) -> bool {
        self.flag() == FLAG_FREE
    }

    pub fn is_live(&self) -> bool {
        IdAllocator::is_positive(self.flag())
    }

    pub fn is_tombstoned(&self) -> bool {
        IdAllocator::is_negative(self.flag())
    }

    /// Free or tombstoned: a block the allocator may hand out again.
    pub fn is_available(&self) -> bool {
        self.is_free() || self.is_tombstoned()
    }

    pub fn pointer(&self) -> Option<BlockAddress> {
        let raw = &self.bytes[POINTER];
        if raw == NULL_POINTER {
            None
        } else {
            Some(BlockAddress::new(raw[0], raw[1], raw[2]))
        }
    }

    pub fn set_pointer(&mut self, pointer: Option<BlockAddress>) {
        let raw = match pointer {
            Some(address) => [address.track, address.sector, address.block],
            None => NULL_POINTER,
        };
        self.bytes[POINTER].copy_from_slice(&raw);
    }

    pub fn date(&self) -> Option<NaiveDateTime> {
        let raw = &self.bytes[DATE];
        let year = u16::from_be_bytes([raw[0], raw[1]]);
        NaiveDate::from_ymd_opt(year.into(), raw[2].into(), raw[3].into())?
            .and_hms_opt(raw[4].into(), raw[5].into(), raw[6].into())
    }

    pub fn set_date(&mut self, date: NaiveDateTime) {
        let year = u16::try_from(date.year()).unwrap_or(0).to_be_bytes();
        let raw = [
            year[0],
            year[1],
            date.month() as u8,
            date.day() as u8,
            date.hour() as u8,
            date.minute() as u8,
            date.second() as u8,
            0,
        ];
        self.bytes[DATE].copy_from_slice(&raw);
    }

    pub fn size(&self) -> u16 {
        u16::from_be_bytes([self.bytes[SIZE.start], self.bytes[SIZE.start + 1]])
    }

    pub fn set_size(&mut self, size: u16) {
        self.bytes[SIZE].copy_from_slice(&size.to_be_bytes());
    }

    pub fn name(&self) -> String {
        let raw = &self.bytes[NAME_OFFSET..];
        let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn set_name(&mut self, name: &str) {
        let field = &mut self.bytes[NAME_OFFSET..];
        field.fill(0);
        field[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[DATA_OFFSET..]
    }

    /// Writes `data` into the payload, zero-filling the remainder.
    pub fn set_payload(&mut self, data: &[u8]) {
        let field = &mut self.bytes[DATA_OFFSET..];
        field.fill(0);
        field[..data.len()].copy_from_slice(data);
    }

    /// Header-only reset: flag and null pointer, content left in place.
    pub fn reset(&mut self, flag: u16) {
        self.set_flag(flag);
        self.set_pointer(None);
    }

    /// Zero-fills everything past the header and resets the header.
    pub fn clear(&mut self, flag: u16) {
        self.bytes.fill(0);
        self.reset(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_new_is_free_with_null_pointer() {
        let block = Block::new(64);
        assert!(block.is_free());
        assert!(block.is_available());
        assert_eq!(block.pointer(), None);
        assert_eq!(block.payload().len(), 59);
    }

    #[test]
    fn test_block_flag_classification() {
        let mut block = Block::new(64);
        block.set_flag(12);
        assert!(block.is_live());
        assert!(!block.is_available());

        block.set_flag(0x8005);
        assert!(block.is_tombstoned());
        assert!(block.is_available());

        block.set_flag(FLAG_RESERVED);
        assert!(!block.is_live());
        assert!(!block.is_available());
    }

    #[test]
    fn test_block_header_fields() {
        let mut block = Block::new(64);
        block.set_pointer(Some(BlockAddress::new(1, 2, 3)));
        block.set_size(300);
        block.set_name("notes.txt");

        assert_eq!(&block.as_bytes()[2..5], &[1, 2, 3]);
        assert_eq!(block.pointer(), Some(BlockAddress::new(1, 2, 3)));
        assert_eq!(block.size(), 300);
        assert_eq!(block.name(), "notes.txt");

        block.set_name("a");
        assert_eq!(block.name(), "a");
    }

    #[test]
    fn test_block_date_survives_encoding() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 45, 7)
            .unwrap();
        let mut block = Block::new(64);
        block.set_date(date);
        assert_eq!(block.date(), Some(date));
    }

    #[test]
    fn test_block_payload_zero_fills() {
        let mut block = Block::new(16);
        block.set_payload(&[9; 11]);
        block.set_payload(b"hi");
        assert_eq!(&block.payload()[..3], b"hi\0");
        assert!(block.payload()[2..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_block_clear_keeps_length() {
        let mut block = Block::new(64);
        block.set_flag(3);
        block.set_payload(b"data");
        block.clear(FLAG_FREE);
        assert!(block.is_free());
        assert_eq!(block.len(), 64);
        assert!(block.payload().iter().all(|&byte| byte == 0));
    }
}
