//! Slotted pages.
//!
//! On-disk layout, matching the spec's fixed-bitmap slotted page exactly:
//!
//! ```text
//! u16 numSlots
//! u16 nextSlot        (sentinel == numSlots means "no known free slot")
//! numSlots * u8        occupancy bitmap, one byte per slot (0/1)
//! numSlots * tupleSize  payload area, one fixed-size slot per tuple
//! ```
//!
//! `numSlots` is derived once from the page size and the schema's packed
//! tuple size and is constant for the page's lifetime.

use crate::error::{Error, Result};

const HEADER_FIXED_LEN: usize = 4; // numSlots (u16) + nextSlot (u16)

/// A fixed-size page holding fixed-width tuples in bitmap-tracked slots.
#[derive(Debug, Clone)]
pub struct SlottedPage {
    num_slots: u16,
    next_slot: u16,
    tuple_size: usize,
    /// Total on-disk size this page packs to, i.e. `pageCapacity` in the
    /// spec's terms. Kept alongside the slot directory so `free_space`
    /// can account for the slack bytes the capacity formula's floor
    /// division leaves unused, not just the unoccupied slots.
    page_capacity: usize,
    bitmap: Vec<u8>,
    payload: Vec<u8>,
}

impl SlottedPage {
    /// Compute how many fixed-width slots of `tuple_size` bytes fit in a
    /// page of `page_size` bytes, given the bitmap overhead of one byte per
    /// slot: `numSlots * (1 + tuple_size) <= page_size - 4`.
    pub fn capacity(page_size: usize, tuple_size: usize) -> u16 {
        let usable = page_size.saturating_sub(HEADER_FIXED_LEN);
        (usable / (1 + tuple_size)) as u16
    }

    /// Create a new, empty page sized for `tuple_size`-byte tuples.
    pub fn new(page_size: usize, tuple_size: usize) -> Self {
        let num_slots = Self::capacity(page_size, tuple_size);
        Self {
            num_slots,
            next_slot: 0,
            tuple_size,
            page_capacity: page_size,
            bitmap: vec![0u8; num_slots as usize],
            payload: vec![0u8; num_slots as usize * tuple_size],
        }
    }

    pub fn num_slots(&self) -> u16 {
        self.num_slots
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn is_occupied(&self, slot: u16) -> bool {
        self.bitmap[slot as usize] != 0
    }

    fn set_occupied(&mut self, slot: u16, occupied: bool) {
        self.bitmap[slot as usize] = occupied as u8;
    }

    fn slot_range(&self, slot: u16) -> std::ops::Range<usize> {
        let start = slot as usize * self.tuple_size;
        start..start + self.tuple_size
    }

    pub fn has_free_tuple(&self) -> bool {
        self.next_slot < self.num_slots
    }

    pub fn used_slots(&self) -> usize {
        self.bitmap.iter().filter(|&&b| b != 0).count()
    }

    /// `pageCapacity` — the total packed size this page serializes to.
    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// `headerSize` — the fixed two `u16` fields plus one bitmap byte per
    /// slot.
    pub fn header_size(&self) -> usize {
        HEADER_FIXED_LEN + self.num_slots as usize
    }

    /// `usedSpace` — `tupleSize * popcount(bitmap)`.
    pub fn used_space(&self) -> usize {
        self.used_slots() * self.tuple_size
    }

    /// `freeSpace = pageCapacity - headerSize - usedSpace`, per the spec's
    /// accounting. This counts both unoccupied slots and the slack bytes
    /// the capacity formula's floor division leaves past the last slot.
    pub fn free_space(&self) -> usize {
        self.page_capacity - self.header_size() - self.used_space()
    }

    /// Find and reserve the next free slot, returning the slot index that
    /// was reserved. Advances `nextSlot` to the following zero bit (or past
    /// the end, if none remains).
    pub fn next_free_tuple(&mut self) -> Option<u16> {
        if !self.has_free_tuple() {
            return None;
        }
        let reserved = self.next_slot;
        self.set_occupied(reserved, true);
        self.next_slot = (0..self.num_slots)
            .find(|&s| !self.is_occupied(s))
            .unwrap_or(self.num_slots);
        Some(reserved)
    }

    /// Insert tuple bytes into the next free slot. Errors with `PageFull`
    /// if there is none.
    pub fn insert_tuple(&mut self, bytes: &[u8]) -> Result<u16> {
        if bytes.len() != self.tuple_size {
            return Err(Error::SchemaMismatch {
                expected: self.tuple_size,
                actual: bytes.len(),
            });
        }
        let slot = self
            .next_free_tuple()
            .ok_or(Error::PageFull(self.num_slots as u32))?;
        let range = self.slot_range(slot);
        self.payload[range].copy_from_slice(bytes);
        Ok(slot)
    }

    /// Overwrite an already-occupied slot in place.
    pub fn put_tuple(&mut self, slot: u16, bytes: &[u8]) -> Result<()> {
        if slot >= self.num_slots || !self.is_occupied(slot) {
            return Err(Error::Internal(format!("slot {} is not occupied", slot)));
        }
        if bytes.len() != self.tuple_size {
            return Err(Error::SchemaMismatch {
                expected: self.tuple_size,
                actual: bytes.len(),
            });
        }
        let range = self.slot_range(slot);
        self.payload[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_tuple(&self, slot: u16) -> Option<&[u8]> {
        if slot >= self.num_slots || !self.is_occupied(slot) {
            return None;
        }
        Some(&self.payload[self.slot_range(slot)])
    }

    /// Zero a slot's payload bytes without clearing its occupancy bit.
    /// Matches the original engine's `clearTuple`: the slot stays "in use"
    /// from the bitmap's perspective, only its bytes are scrubbed.
    pub fn clear_tuple(&mut self, slot: u16) -> Result<()> {
        if slot >= self.num_slots {
            return Err(Error::Internal(format!("slot {} out of range", slot)));
        }
        let range = self.slot_range(slot);
        self.payload[range].fill(0);
        Ok(())
    }

    /// Clear the occupancy bit (and zero the payload) and make the slot
    /// eligible for reuse by `nextFreeTuple`.
    pub fn delete_tuple(&mut self, slot: u16) -> Result<()> {
        self.clear_tuple(slot)?;
        self.set_occupied(slot, false);
        if slot < self.next_slot {
            self.next_slot = slot;
        }
        Ok(())
    }

    /// Iterate over occupied slots in slot order, yielding `(slot, bytes)`.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> {
        (0..self.num_slots).filter_map(move |s| self.get_tuple(s).map(|b| (s, b)))
    }

    /// Serialize this page to exactly `page_capacity` bytes (padded with
    /// trailing zeros to fill the page).
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_capacity);
        buf.extend_from_slice(&self.num_slots.to_le_bytes());
        buf.extend_from_slice(&self.next_slot.to_le_bytes());
        buf.extend_from_slice(&self.bitmap);
        buf.extend_from_slice(&self.payload);
        buf.resize(self.page_capacity, 0);
        buf
    }

    /// Parse a page previously produced by `pack`, given the tuple size the
    /// owning file was built with.
    pub fn unpack(bytes: &[u8], tuple_size: usize) -> Result<Self> {
        if bytes.len() < HEADER_FIXED_LEN {
            return Err(Error::CorruptHeader(
                "page shorter than fixed header".to_string(),
            ));
        }
        let num_slots = u16::from_le_bytes([bytes[0], bytes[1]]);
        let next_slot = u16::from_le_bytes([bytes[2], bytes[3]]);
        let bitmap_start = HEADER_FIXED_LEN;
        let bitmap_end = bitmap_start + num_slots as usize;
        let payload_end = bitmap_end + num_slots as usize * tuple_size;
        if bytes.len() < payload_end {
            return Err(Error::CorruptHeader(format!(
                "page buffer of {} bytes too short for {} slots of size {}",
                bytes.len(),
                num_slots,
                tuple_size
            )));
        }
        Ok(Self {
            num_slots,
            next_slot,
            tuple_size,
            page_capacity: bytes.len(),
            bitmap: bytes[bitmap_start..bitmap_end].to_vec(),
            payload: bytes[bitmap_end..payload_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_accounts_for_bitmap_overhead() {
        // 4 header + n*(1+8) <= 100
        let cap = SlottedPage::capacity(100, 8);
        assert_eq!(cap, 10);
    }

    #[test]
    fn test_insert_and_get() {
        let mut page = SlottedPage::new(4096, 16);
        let slot = page.insert_tuple(&[7u8; 16]).unwrap();
        assert_eq!(page.get_tuple(slot), Some(&[7u8; 16][..]));
    }

    #[test]
    fn test_clear_tuple_keeps_slot_occupied() {
        let mut page = SlottedPage::new(4096, 16);
        let slot = page.insert_tuple(&[9u8; 16]).unwrap();
        page.clear_tuple(slot).unwrap();
        assert_eq!(page.get_tuple(slot), Some(&[0u8; 16][..]));
        assert!(page.is_occupied(slot));
    }

    #[test]
    fn test_delete_then_next_free_tuple_reuses_slot() {
        let mut page = SlottedPage::new(4096, 16);
        let first = page.insert_tuple(&[1u8; 16]).unwrap();
        let second = page.insert_tuple(&[2u8; 16]).unwrap();
        page.delete_tuple(first).unwrap();
        let reused = page.next_free_tuple().unwrap();
        assert_eq!(reused, first);
        assert_ne!(reused, second);
    }

    #[test]
    fn test_full_page_errors() {
        let mut page = SlottedPage::new(32, 16);
        assert_eq!(page.num_slots(), 1);
        page.insert_tuple(&[1u8; 16]).unwrap();
        assert!(matches!(
            page.insert_tuple(&[2u8; 16]),
            Err(Error::PageFull(_))
        ));
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let mut page = SlottedPage::new(4096, 16);
        page.insert_tuple(&[5u8; 16]).unwrap();
        page.insert_tuple(&[6u8; 16]).unwrap();
        let packed = page.pack();
        assert_eq!(packed.len(), 4096);
        let unpacked = SlottedPage::unpack(&packed, 16).unwrap();
        assert_eq!(unpacked.num_slots(), page.num_slots());
        let tuples: Vec<_> = unpacked.iter().map(|(_, b)| b.to_vec()).collect();
        assert_eq!(tuples, vec![vec![5u8; 16], vec![6u8; 16]]);
    }

    #[test]
    fn test_iter_skips_unoccupied_slots() {
        let mut page = SlottedPage::new(4096, 16);
        let a = page.insert_tuple(&[1u8; 16]).unwrap();
        let _b = page.insert_tuple(&[2u8; 16]).unwrap();
        page.delete_tuple(a).unwrap();
        let remaining: Vec<_> = page.iter().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_used_plus_free_plus_header_equals_capacity() {
        let mut page = SlottedPage::new(4096, 16);
        let check = |p: &SlottedPage| {
            assert_eq!(
                p.used_space() + p.free_space() + p.header_size(),
                p.page_capacity()
            );
        };
        check(&page);
        page.insert_tuple(&[1u8; 16]).unwrap();
        check(&page);
        let slot = page.insert_tuple(&[2u8; 16]).unwrap();
        check(&page);
        page.delete_tuple(slot).unwrap();
        check(&page);
    }

    #[test]
    fn test_free_space_accounts_for_header_and_slack() {
        // page_capacity=100, tuple_size=8 -> num_slots=10, header=4+10=14,
        // payload=10*8=80, so 100-14-80=6 bytes of slack even when empty.
        let page = SlottedPage::new(100, 8);
        assert_eq!(page.num_slots(), 10);
        assert_eq!(page.header_size(), 14);
        assert_eq!(page.free_space(), 100 - 14);
    }
}
