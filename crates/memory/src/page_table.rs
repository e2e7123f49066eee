//! 软件页表。由 [`crate::user_access`] 模拟 MMU 查表并维护 A/D 位

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use crate::{FrameId, VirtPageNum};

bitflags! {
    /// 页表项标志位，语义与硬件页表一致
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u8 {
        const V = 1 << 0;
        const W = 1 << 2;
        const U = 1 << 4;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PageTableEntry {
    frame: FrameId,
    flags: PTEFlags,
}

impl PageTableEntry {
    pub fn frame(&self) -> FrameId {
        self.frame
    }
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PTEFlags::W)
    }
    pub fn is_accessed(&self) -> bool {
        self.flags.contains(PTEFlags::A)
    }
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PTEFlags::D)
    }
}

/// 一个用户地址空间的页目录
#[derive(Default)]
pub struct PageTable {
    entries: BTreeMap<VirtPageNum, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立映射。该页此前不能已被映射
    pub fn map(&mut self, vpn: VirtPageNum, frame: FrameId, writable: bool) {
        let mut flags = PTEFlags::V | PTEFlags::U;
        flags.set(PTEFlags::W, writable);
        let old = self.entries.insert(vpn, PageTableEntry { frame, flags });
        assert!(old.is_none(), "{vpn:?} is mapped twice");
    }

    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.flags.set(PTEFlags::A, accessed);
        }
    }

    pub fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.flags.set(PTEFlags::D, dirty);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::PageTable;
    use crate::{FrameId, VirtPageNum};

    #[test]
    fn map_and_bits() {
        let mut pt = PageTable::new();
        let vpn = VirtPageNum(7);
        pt.map(vpn, FrameId(3), false);
        let pte = pt.translate(vpn).unwrap();
        assert_eq!(pte.frame(), FrameId(3));
        assert!(!pte.is_writable());
        assert!(!pte.is_accessed() && !pte.is_dirty());

        pt.set_accessed(vpn, true);
        pt.set_dirty(vpn, true);
        let pte = pt.translate(vpn).unwrap();
        assert!(pte.is_accessed() && pte.is_dirty());

        assert!(pt.unmap(vpn).is_some());
        assert!(pt.translate(vpn).is_none());
        assert!(pt.is_empty());
    }

    #[test]
    #[should_panic(expected = "mapped twice")]
    fn double_map() {
        let mut pt = PageTable::new();
        pt.map(VirtPageNum(1), FrameId(0), true);
        pt.map(VirtPageNum(1), FrameId(1), true);
    }
}
