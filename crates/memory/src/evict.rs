//! 二次机会（时钟）换出
//!
//! 时钟指针循环扫描页帧表，空闲与钉住的页帧直接跳过。
//! 访问位为 1 的页清零访问位后跳过，否则选为换出对象。
//! 栈页或脏页写入交换区，干净的文件页直接丢弃。
//! 扫描最多两圈：第一圈清掉所有访问位，第二圈必然能选中一个，
//! 除非所有候选都需要交换槽位而交换区已满

use defines::error::{errno, KResult};

use crate::{
    pager::Counters, space::SpaceInner, FrameId, PageKind, Pager, SwapMeta,
};

impl Pager {
    /// 换出一个页帧并把它清零、钉住后交给调用方
    ///
    /// 调用方须持有换页锁。检查访问位与换出动作在同一段临界区
    /// （页帧表锁 + 所有者地址空间锁）内完成
    pub(crate) fn evict(&self) -> KResult<FrameId> {
        let mut table = self.frames.inner.lock();
        let capacity = table.owners.len();
        let swap_full = self.swap.is_full();

        for _ in 0..2 * capacity {
            let idx = table.clock_hand;
            table.clock_hand = (idx + 1) % capacity;
            let Some(owner) = table.owners[idx].clone() else {
                continue;
            };
            let frame = FrameId(idx);

            let Some(space) = owner.space.upgrade() else {
                // 地址空间已被丢弃，页帧可以直接回收
                debug!("reclaim {frame:?} left by a dropped address space");
                table.owners[idx] = None;
                drop(table);
                self.frames.bytes(frame).fill(0);
                Counters::bump(&self.counters.evictions);
                return Ok(frame);
            };

            let mut guard = space.inner.lock();
            let SpaceInner {
                page_table, spt, ..
            } = &mut *guard;
            let Some(pte) = page_table.translate(owner.vpn) else {
                panic!("{frame:?} backs {:?} which is not mapped", owner.vpn);
            };
            assert_eq!(pte.frame(), frame, "{:?} is mapped elsewhere", owner.vpn);
            if pte.is_accessed() {
                page_table.set_accessed(owner.vpn, false);
                continue;
            }
            // 页帧表与补充页表对同一页帧的记录必须一致
            assert_eq!(
                spt.find_by_frame(frame).map(|info| info.vpn),
                Some(owner.vpn),
                "{frame:?} is not recorded as backing {:?}",
                owner.vpn
            );
            let Some(info) = spt.get_mut(owner.vpn) else {
                panic!("resident {:?} has no page info", owner.vpn);
            };

            let dirty = pte.is_dirty();
            let needs_swap = info.kind == PageKind::Stack || dirty;
            if needs_swap && swap_full {
                continue;
            }
            if needs_swap {
                let slot = self.swap.allocate_slot().ok_or(errno::ENOMEM)?;
                let meta = SwapMeta {
                    kind: info.kind,
                    dirty,
                };
                if let Err(e) = self.swap.write_page(slot, &self.frames.bytes(frame), meta) {
                    let _ = self.swap.free_slot(slot);
                    return Err(e);
                }
                debug!(
                    "swap out {:?} of thread {} from {frame:?} to slot {slot}",
                    owner.vpn,
                    space.thread().tid()
                );
                info.kind = PageKind::Swap;
                info.swap_slot = Some(slot);
                Counters::bump(&self.counters.swap_outs);
            } else {
                debug!(
                    "discard clean {:?} of thread {} from {frame:?}",
                    owner.vpn,
                    space.thread().tid()
                );
            }

            // 先解除映射，所有者再次访问时会重新缺页
            page_table.unmap(owner.vpn);
            info.frame = None;
            drop(guard);
            table.owners[idx] = None;
            drop(table);

            self.frames.bytes(frame).fill(0);
            Counters::bump(&self.counters.evictions);
            return Ok(frame);
        }

        warn!(
            "no frame can be evicted: {} frames, swap {}/{} used",
            capacity,
            self.swap.used(),
            self.swap.capacity()
        );
        Err(errno::ENOMEM)
    }
}
