//! 换页子系统的入口：页帧表、交换区与全局换页锁

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use common::config::{STACK_SLACK, USER_FRAMES, USER_STACK_SIZE, USER_STACK_TOP};
use defines::error::KResult;
use drivers::BlockDevice;
use klocks::{Lock, ThreadRef};

use crate::{FrameId, FrameTable, SwapTable, UserSpace, VirtAddr};

#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    /// 用户页帧数量
    pub frames: usize,
    pub stack_top: VirtAddr,
    /// 栈最多能增长到的大小
    pub max_stack_size: usize,
    /// 栈指针之下仍视为栈访问的字节数
    pub stack_slack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frames: USER_FRAMES,
            stack_top: VirtAddr(USER_STACK_TOP),
            max_stack_size: USER_STACK_SIZE,
            stack_slack: STACK_SLACK,
        }
    }
}

/// 各类换页事件的计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmStats {
    pub faults: usize,
    pub resolved: usize,
    pub stack_growths: usize,
    pub evictions: usize,
    pub swap_outs: usize,
    pub swap_ins: usize,
    pub file_loads: usize,
    pub terminations: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) faults: AtomicUsize,
    pub(crate) resolved: AtomicUsize,
    pub(crate) stack_growths: AtomicUsize,
    pub(crate) evictions: AtomicUsize,
    pub(crate) swap_outs: AtomicUsize,
    pub(crate) swap_ins: AtomicUsize,
    pub(crate) file_loads: AtomicUsize,
    pub(crate) terminations: AtomicUsize,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Pager {
    pub(crate) config: VmConfig,
    pub(crate) frames: FrameTable,
    pub(crate) swap: SwapTable,
    /// 从取得页帧到装入映射的整个过程都在这把锁下串行进行
    pub(crate) paging_lock: Lock,
    pub(crate) counters: Counters,
}

impl Pager {
    pub fn new(config: VmConfig, swap_device: Arc<dyn BlockDevice>) -> Self {
        let swap = SwapTable::new(swap_device);
        info!(
            "pager: {} frames, {} swap slots, stack top {:?}",
            config.frames,
            swap.capacity(),
            config.stack_top
        );
        Self {
            config,
            frames: FrameTable::new(config.frames),
            swap,
            paging_lock: Lock::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }

    /// 取得一个清零且钉住的页帧，没有空闲页帧时换出一个
    ///
    /// 调用方用完后需通过 [`FrameTable::free_frame`] 归还
    pub async fn acquire_frame(&self, cur: &ThreadRef) -> KResult<FrameId> {
        let paging = self.paging_lock.lock(cur).await;
        let frame = self.obtain_frame();
        paging.unlock().await;
        frame
    }

    /// 调用方须持有换页锁
    pub(crate) fn obtain_frame(&self) -> KResult<FrameId> {
        match self.frames.try_alloc() {
            Some(frame) => Ok(frame),
            None => self.evict(),
        }
    }

    /// 进程退出时调用：释放该地址空间的所有页帧与交换槽位，并清空页目录
    ///
    /// 之后该地址空间处于终止状态，不能再访问
    pub async fn release_all_vm_resources(&self, space: &Arc<UserSpace>) {
        let paging = self.paging_lock.lock(space.thread()).await;
        space.terminate();
        let pages: Vec<_> = {
            let mut inner = space.inner.lock();
            inner.page_table.clear();
            inner.spt.take_all().collect()
        };
        let mut frames = 0;
        let mut slots = 0;
        for page in pages {
            if let Some(frame) = page.frame {
                self.frames.free_frame(frame);
                frames += 1;
            }
            if let Some(slot) = page.swap_slot {
                let _ = self.swap.free_slot(slot);
                slots += 1;
            }
        }
        debug!(
            "thread {} released {frames} frames and {slots} swap slots",
            space.thread().tid()
        );
        paging.unlock().await;
    }

    pub fn stats(&self) -> VmStats {
        let c = &self.counters;
        VmStats {
            faults: c.faults.load(Ordering::Relaxed),
            resolved: c.resolved.load(Ordering::Relaxed),
            stack_growths: c.stack_growths.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            swap_outs: c.swap_outs.load(Ordering::Relaxed),
            swap_ins: c.swap_ins.load(Ordering::Relaxed),
            file_loads: c.file_loads.load(Ordering::Relaxed),
            terminations: c.terminations.load(Ordering::Relaxed),
        }
    }
}
