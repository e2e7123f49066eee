//! 缺页的分类与处理

use alloc::sync::Arc;

use defines::error::{errno, KResult};

use crate::{
    pager::Counters,
    space::SpaceInner,
    spt::PageInfo,
    FrameId, PageKind, Pager, UserSpace, VirtAddr, VirtPageNum,
};

/// 中断层交给缺页处理的上下文
#[derive(Clone, Copy, Debug)]
pub struct PageFault {
    pub addr: VirtAddr,
    /// 访问的页存在（即权限错误）还是不存在
    pub present: bool,
    pub write: bool,
    /// 是否发生在用户态
    pub user: bool,
    /// 发生缺页时的用户栈指针
    pub stack_pointer: VirtAddr,
}

impl Pager {
    /// 处理一次用户态缺页
    ///
    /// 成功时该页已装入并映射。无法处理时（访问未登记的地址、写只读页、
    /// 内存耗尽等）该地址空间被标记为终止并返回错误，其他地址空间不受影响。
    /// 内核态的缺页是内核的 bug，直接 panic
    pub async fn resolve_fault(&self, space: &Arc<UserSpace>, fault: &PageFault) -> KResult<()> {
        Counters::bump(&self.counters.faults);
        if !fault.user {
            panic!(
                "page fault in kernel context at {:?} ({} {})",
                fault.addr,
                if fault.present { "rights violation" } else { "not present" },
                if fault.write { "writing" } else { "reading" },
            );
        }
        trace!(
            "thread {} faults at {:?}, present: {}, write: {}",
            space.thread().tid(),
            fault.addr,
            fault.present,
            fault.write
        );

        let paging = self.paging_lock.lock(space.thread()).await;
        // 已终止（包括已回收资源）的地址空间不再装入任何页
        if space.is_terminated() {
            paging.unlock().await;
            return Err(errno::EFAULT);
        }
        let result = self.resolve_locked(space, fault);
        match result {
            Ok(()) => Counters::bump(&self.counters.resolved),
            Err(e) => {
                space.terminate();
                Counters::bump(&self.counters.terminations);
                info!(
                    "terminate thread {} on fault at {:?}: {e}",
                    space.thread().tid(),
                    fault.addr
                );
            }
        }
        paging.unlock().await;
        result
    }

    fn resolve_locked(&self, space: &Arc<UserSpace>, fault: &PageFault) -> KResult<()> {
        let vpn = fault.addr.vpn();
        let mut grown = false;
        {
            let mut inner = space.inner.lock();
            inner.stack_pointer = fault.stack_pointer;
            match inner.spt.get(vpn) {
                Some(info) if fault.write && !info.writable => return Err(errno::EACCES),
                // 已经驻留，可能是其他线程先一步处理了同一页
                Some(info) if info.is_resident() => return Ok(()),
                Some(_) => {}
                None if self.is_stack_access(fault) => {
                    debug!(
                        "grow stack of thread {} to {:?}",
                        space.thread().tid(),
                        fault.addr
                    );
                    inner.spt.insert(PageInfo::stack(vpn));
                    Counters::bump(&self.counters.stack_growths);
                    grown = true;
                }
                None => return Err(errno::EFAULT),
            }
        }

        let result = self.load_page(space, vpn);
        if result.is_err() && grown {
            // 没能装入的新栈页不留在补充页表里
            space.inner.lock().spt.remove(vpn);
        }
        result
    }

    /// 为已登记的 `vpn` 取得页帧并装入、映射
    fn load_page(&self, space: &Arc<UserSpace>, vpn: VirtPageNum) -> KResult<()> {
        // 换出需要先拿页帧表锁再拿地址空间锁，所以这里不能持有地址空间锁
        let frame = self.obtain_frame()?;
        let frame = scopeguard::guard(frame, |frame| self.frames.free_frame(frame));

        let mut guard = space.inner.lock();
        let SpaceInner {
            page_table, spt, ..
        } = &mut *guard;
        let Some(info) = spt.get_mut(vpn) else {
            panic!("page info of {vpn:?} vanished while resolving a fault");
        };
        let dirty = self.fill_frame(*frame, info)?;

        page_table.map(vpn, *frame, info.writable);
        if dirty {
            page_table.set_dirty(vpn, true);
        }
        info.frame = Some(*frame);
        drop(guard);

        let frame = scopeguard::ScopeGuard::into_inner(frame);
        self.frames.set_owner(frame, Arc::downgrade(space), vpn);
        Ok(())
    }

    /// 按页的来源填充页帧（页帧已清零），返回装入后是否应置脏位
    fn fill_frame(&self, frame: FrameId, info: &mut PageInfo) -> KResult<bool> {
        let mut bytes = self.frames.bytes(frame);
        match info.kind {
            PageKind::File => {
                let Some(backing) = &info.file else {
                    panic!("file page {:?} has no backing file", info.vpn);
                };
                let buf = &mut bytes[..backing.read_bytes];
                if backing.file.read_at(backing.offset, buf) != backing.read_bytes {
                    return Err(errno::EIO);
                }
                Counters::bump(&self.counters.file_loads);
                Ok(false)
            }
            PageKind::Swap => {
                let Some(slot) = info.swap_slot else {
                    panic!("swapped page {:?} has no swap slot", info.vpn);
                };
                self.swap.read_page(slot, &mut bytes)?;
                let Some(meta) = self.swap.free_slot(slot) else {
                    panic!("swap slot {slot} holds no page");
                };
                debug!("swap in {:?} from slot {slot} to {frame:?}", info.vpn);
                info.swap_slot = None;
                info.kind = meta.kind;
                Counters::bump(&self.counters.swap_ins);
                Ok(meta.dirty)
            }
            PageKind::Stack => Ok(false),
        }
    }

    /// 地址在栈顶之下、栈的最大范围之内，且不低于栈指针减去容差
    fn is_stack_access(&self, fault: &PageFault) -> bool {
        let addr = fault.addr.0;
        let top = self.config.stack_top.0;
        let bottom = top.saturating_sub(self.config.max_stack_size);
        (bottom..top).contains(&addr) && addr + self.config.stack_slack >= fault.stack_pointer.0
    }
}
