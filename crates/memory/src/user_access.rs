//! 经由页目录访问用户内存，模拟 MMU：查表、置访问位与脏位，
//! 查表失败时产生缺页并交给 [`Pager::resolve_fault`]

use alloc::sync::Arc;

use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};

use crate::{frame_table::FrameBytes, PageFault, Pager, UserSpace, VirtAddr};

impl Pager {
    pub async fn read_user(
        &self,
        space: &Arc<UserSpace>,
        addr: VirtAddr,
        buf: &mut [u8],
    ) -> KResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let va = addr.add(done);
            let len = (PAGE_SIZE - va.page_offset()).min(buf.len() - done);
            let dst = &mut buf[done..done + len];
            self.access_page(space, va, false, |page| {
                dst.copy_from_slice(&page[va.page_offset()..va.page_offset() + len]);
            })
            .await?;
            done += len;
        }
        Ok(())
    }

    pub async fn write_user(&self, space: &Arc<UserSpace>, addr: VirtAddr, buf: &[u8]) -> KResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let va = addr.add(done);
            let len = (PAGE_SIZE - va.page_offset()).min(buf.len() - done);
            let src = &buf[done..done + len];
            self.access_page(space, va, true, |page| {
                page[va.page_offset()..va.page_offset() + len].copy_from_slice(src);
            })
            .await?;
            done += len;
        }
        Ok(())
    }

    /// 访问 `va` 所在的页，必要时先处理缺页
    async fn access_page(
        &self,
        space: &Arc<UserSpace>,
        va: VirtAddr,
        write: bool,
        op: impl FnOnce(&mut FrameBytes),
    ) -> KResult<()> {
        let mut op = Some(op);
        loop {
            if space.is_terminated() {
                return Err(errno::EFAULT);
            }
            match self.try_access(space, va, write, &mut op) {
                Ok(()) => return Ok(()),
                Err(fault) => self.resolve_fault(space, &fault).await?,
            }
        }
    }

    /// 查表成功时在持有地址空间锁的情况下执行 `op`，保证期间页帧不会被换出
    fn try_access(
        &self,
        space: &UserSpace,
        va: VirtAddr,
        write: bool,
        op: &mut Option<impl FnOnce(&mut FrameBytes)>,
    ) -> Result<(), PageFault> {
        let mut inner = space.inner.lock();
        let vpn = va.vpn();
        let stack_pointer = inner.stack_pointer;
        let fault = |present| PageFault {
            addr: va,
            present,
            write,
            user: true,
            stack_pointer,
        };
        let Some(pte) = inner.page_table.translate(vpn) else {
            return Err(fault(false));
        };
        if write && !pte.is_writable() {
            return Err(fault(true));
        }
        inner.page_table.set_accessed(vpn, true);
        if write {
            inner.page_table.set_dirty(vpn, true);
        }
        if let Some(op) = op.take() {
            let mut bytes = self.frames.bytes(pte.frame());
            op(&mut **bytes);
        }
        Ok(())
    }
}
