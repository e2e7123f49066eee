//! 用户页帧表：固定数量的页帧组成的 arena，以 [`FrameId`] 索引
//!
//! 簿记信息（是否占用、属于哪个地址空间的哪个虚拟页、时钟指针）由一把自旋锁保护，
//! 每个页帧的内容各有一把锁。
//!
//! 已占用但没有所有者的页帧处于“钉住”状态：正在被填充，不会被选为换出对象

use alloc::{boxed::Box, sync::Weak, vec::Vec};
use core::fmt;

use common::config::PAGE_SIZE;
use idallocator::IdAllocator;
use klocks::{SpinMutex, SpinMutexGuard};

use crate::{UserSpace, VirtPageNum};

pub type FrameBytes = [u8; PAGE_SIZE];

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}", self.0)
    }
}

#[derive(Clone)]
pub(crate) struct FrameOwner {
    pub(crate) space: Weak<UserSpace>,
    pub(crate) vpn: VirtPageNum,
}

pub(crate) struct FrameTableInner {
    pub(crate) slots: IdAllocator,
    /// `owners[i]` 为 `None` 时，页帧 `i` 空闲或被钉住
    pub(crate) owners: Vec<Option<FrameOwner>>,
    pub(crate) clock_hand: usize,
}

pub struct FrameTable {
    pub(crate) inner: SpinMutex<FrameTableInner>,
    memory: Box<[SpinMutex<Box<FrameBytes>>]>,
}

impl FrameTable {
    pub fn new(capacity: usize) -> Self {
        let memory = (0..capacity)
            .map(|_| SpinMutex::new(Box::new([0; PAGE_SIZE])))
            .collect();
        Self {
            inner: SpinMutex::new(FrameTableInner {
                slots: IdAllocator::new(capacity),
                owners: (0..capacity).map(|_| None).collect(),
                clock_hand: 0,
            }),
            memory,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// 已占用的页帧数量
    pub fn used(&self) -> usize {
        self.inner.lock().slots.used()
    }

    pub fn is_occupied(&self, frame: FrameId) -> bool {
        self.inner.lock().slots.is_allocated(frame.0)
    }

    /// 分配一个空闲页帧，返回时已清零且处于钉住状态
    pub(crate) fn try_alloc(&self) -> Option<FrameId> {
        let frame = FrameId(self.inner.lock().slots.alloc()?);
        self.bytes(frame).fill(0);
        Some(frame)
    }

    /// 释放一个已占用的页帧并清除其所有者
    pub fn free_frame(&self, frame: FrameId) {
        let mut inner = self.inner.lock();
        assert!(
            inner.slots.dealloc(frame.0),
            "free {frame:?} which is not occupied"
        );
        inner.owners[frame.0] = None;
    }

    /// 记录页帧所属的地址空间与虚拟页，同时解除钉住
    pub(crate) fn set_owner(&self, frame: FrameId, space: Weak<UserSpace>, vpn: VirtPageNum) {
        let mut inner = self.inner.lock();
        assert!(
            inner.slots.is_allocated(frame.0),
            "set owner of {frame:?} which is not occupied"
        );
        inner.owners[frame.0] = Some(FrameOwner { space, vpn });
    }

    /// 页帧当前映射的虚拟页，空闲或钉住时为 `None`
    pub fn owner_vpn(&self, frame: FrameId) -> Option<VirtPageNum> {
        self.inner.lock().owners[frame.0].as_ref().map(|o| o.vpn)
    }

    pub fn bytes(&self, frame: FrameId) -> SpinMutexGuard<'_, Box<FrameBytes>> {
        self.memory[frame.0].lock()
    }
}
