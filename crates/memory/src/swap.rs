//! 交换区：块设备上的一组页大小的槽位
//!
//! 槽位 `i` 占据扇区 `[i * N, (i + 1) * N)`，`N = PAGE_SIZE / 扇区大小`，
//! 读写都按扇区 0 到 N - 1 的顺序进行

use alloc::{sync::Arc, vec::Vec};

use common::config::PAGE_SIZE;
use defines::error::KResult;
use drivers::BlockDevice;
use idallocator::IdAllocator;
use klocks::SpinMutex;

use crate::{frame_table::FrameBytes, PageKind};

/// 槽位中保存的页的元信息，换入时据此恢复页的类型与脏位
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapMeta {
    pub kind: PageKind,
    pub dirty: bool,
}

pub struct SwapTable {
    device: Arc<dyn BlockDevice>,
    sectors_per_slot: usize,
    inner: SpinMutex<SwapInner>,
}

struct SwapInner {
    slots: IdAllocator,
    /// 已分配但尚未写入的槽位为 `None`
    metas: Vec<Option<SwapMeta>>,
}

impl SwapTable {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let sector_size = device.sector_size();
        assert!(
            sector_size > 0 && PAGE_SIZE % sector_size == 0,
            "sector size {sector_size} does not divide the page size"
        );
        let sectors_per_slot = PAGE_SIZE / sector_size;
        let capacity = device.num_sectors() / sectors_per_slot;
        Self {
            device,
            sectors_per_slot,
            inner: SpinMutex::new(SwapInner {
                slots: IdAllocator::new(capacity),
                metas: (0..capacity).map(|_| None).collect(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.capacity()
    }

    pub fn used(&self) -> usize {
        self.inner.lock().slots.used()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().slots.is_full()
    }

    /// 占用编号最小的空闲槽位
    pub fn allocate_slot(&self) -> Option<usize> {
        self.inner.lock().slots.alloc()
    }

    pub fn write_page(&self, slot: usize, data: &FrameBytes, meta: SwapMeta) -> KResult<()> {
        assert!(
            self.inner.lock().slots.is_allocated(slot),
            "write to swap slot {slot} which is not allocated"
        );
        let sector_size = PAGE_SIZE / self.sectors_per_slot;
        for (i, sector) in data.chunks_exact(sector_size).enumerate() {
            self.device
                .write_sector(slot * self.sectors_per_slot + i, sector)?;
        }
        self.inner.lock().metas[slot] = Some(meta);
        Ok(())
    }

    pub fn read_page(&self, slot: usize, data: &mut FrameBytes) -> KResult<()> {
        assert!(
            self.inner.lock().metas[slot].is_some(),
            "read from swap slot {slot} which holds no page"
        );
        let sector_size = PAGE_SIZE / self.sectors_per_slot;
        for (i, sector) in data.chunks_exact_mut(sector_size).enumerate() {
            self.device
                .read_sector(slot * self.sectors_per_slot + i, sector)?;
        }
        Ok(())
    }

    /// 释放一个已占用的槽位，返回其中记录的元信息（若已写入）
    pub fn free_slot(&self, slot: usize) -> Option<SwapMeta> {
        let mut inner = self.inner.lock();
        assert!(
            inner.slots.dealloc(slot),
            "free swap slot {slot} which is not occupied"
        );
        inner.metas[slot].take()
    }
}
