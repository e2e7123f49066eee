//! 用户地址空间：页目录、补充页表与栈指针快照

use alloc::{sync::Arc, vec::Vec};

use atomic::{Atomic, Ordering};
use common::config::{PAGE_SIZE, USER_STACK_TOP};
use defines::error::{errno, KResult};
use klocks::{SpinMutex, ThreadRef};

use crate::{
    spt::{FileBacking, PageInfo, SupplementalPageTable},
    PageTable, PagedFile, VirtAddr, VirtPageNum,
};

#[derive(bytemuck::NoUninit, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpaceStatus {
    Running,
    /// 因无法处理的缺页被终止，等待回收资源
    Terminated,
}

pub struct UserSpace {
    thread: ThreadRef,
    status: Atomic<SpaceStatus>,
    pub(crate) inner: SpinMutex<SpaceInner>,
}

pub(crate) struct SpaceInner {
    pub(crate) page_table: PageTable,
    pub(crate) spt: SupplementalPageTable,
    /// 最近一次进入内核时的用户栈指针
    pub(crate) stack_pointer: VirtAddr,
}

impl UserSpace {
    pub fn new(thread: ThreadRef) -> Arc<Self> {
        Arc::new(Self {
            thread,
            status: Atomic::new(SpaceStatus::Running),
            inner: SpinMutex::new(SpaceInner {
                page_table: PageTable::new(),
                spt: SupplementalPageTable::new(),
                stack_pointer: VirtAddr(USER_STACK_TOP),
            }),
        })
    }

    pub fn thread(&self) -> &ThreadRef {
        &self.thread
    }

    pub fn status(&self) -> SpaceStatus {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == SpaceStatus::Terminated
    }

    pub(crate) fn terminate(&self) {
        self.status.store(SpaceStatus::Terminated, Ordering::Release);
    }

    pub fn stack_pointer(&self) -> VirtAddr {
        self.inner.lock().stack_pointer
    }

    pub fn set_stack_pointer(&self, sp: VirtAddr) {
        self.inner.lock().stack_pointer = sp;
    }

    /// 按页拆分一个可执行文件段，登记为惰性装入的文件页
    ///
    /// `[addr, addr + read_bytes + zero_bytes)` 中前 `read_bytes` 字节来自文件 `offset` 处，
    /// 其余补零。全零的页同样登记为文件页，只是需要读取的字节数为 0
    pub fn load_segment(
        &self,
        addr: VirtAddr,
        file: Arc<dyn PagedFile>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> KResult<()> {
        if !addr.is_page_aligned() || (read_bytes + zero_bytes) % PAGE_SIZE != 0 {
            return Err(errno::EINVAL);
        }
        let start = addr.vpn();
        let page_count = addr.add(read_bytes + zero_bytes).vpn_ceil().0 - start.0;

        let mut inner = self.inner.lock();
        if (0..page_count).any(|i| inner.spt.get(start + i).is_some()) {
            return Err(errno::EEXIST);
        }
        let mut remaining = read_bytes;
        let pages: Vec<_> = (0..page_count)
            .map(|i| {
                let page_read = remaining.min(PAGE_SIZE);
                remaining -= page_read;
                let backing = FileBacking {
                    file: Arc::clone(&file),
                    offset: offset + i * PAGE_SIZE,
                    read_bytes: page_read,
                };
                PageInfo::file(start + i, backing, writable)
            })
            .collect();
        for page in pages {
            inner.spt.insert(page);
        }
        Ok(())
    }

    /// 登记单个文件页
    pub fn map_file_page(
        &self,
        vpn: VirtPageNum,
        backing: FileBacking,
        writable: bool,
    ) -> KResult<()> {
        if backing.read_bytes > PAGE_SIZE {
            return Err(errno::EINVAL);
        }
        if self
            .inner
            .lock()
            .spt
            .insert(PageInfo::file(vpn, backing, writable))
        {
            Ok(())
        } else {
            Err(errno::EEXIST)
        }
    }

    /// 在持有地址空间锁的情况下查看某页的补充页表项
    pub fn with_page<R>(&self, vpn: VirtPageNum, f: impl FnOnce(&PageInfo) -> R) -> Option<R> {
        self.inner.lock().spt.get(vpn).map(f)
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().spt.len()
    }

    /// 当前驻留在内存中的页数
    pub fn resident_pages(&self) -> usize {
        self.inner.lock().page_table.len()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{sync::Arc, vec};

    use common::config::{PAGE_SIZE, PRI_DEFAULT};
    use defines::error::errno;
    use klocks::KThread;

    use super::UserSpace;
    use crate::{spt::FileBacking, PageKind, VirtAddr, VirtPageNum};

    #[test]
    fn load_segment_splits_pages() {
        let space = UserSpace::new(KThread::new("loader", PRI_DEFAULT));
        let file = Arc::new(vec![7u8; 3 * PAGE_SIZE]);
        space
            .load_segment(VirtAddr(0x10000), file, 0x100, PAGE_SIZE + 10, 2 * PAGE_SIZE - 10, false)
            .unwrap();
        assert_eq!(space.page_count(), 3);

        let layout: Vec<_> = (0x10..0x13)
            .map(|vpn| {
                space
                    .with_page(VirtPageNum(vpn), |info| {
                        let backing = info.file.as_ref().unwrap();
                        (info.kind, backing.offset, backing.read_bytes, info.writable)
                    })
                    .unwrap()
            })
            .collect();
        assert_eq!(
            layout,
            [
                (PageKind::File, 0x100, PAGE_SIZE, false),
                (PageKind::File, 0x100 + PAGE_SIZE, 10, false),
                (PageKind::File, 0x100 + 2 * PAGE_SIZE, 0, false),
            ]
        );
        assert_eq!(space.resident_pages(), 0);
    }

    #[test]
    fn load_segment_rejects_bad_arguments() {
        let space = UserSpace::new(KThread::new("loader", PRI_DEFAULT));
        let file = Arc::new(vec![0u8; 16]);
        assert_eq!(
            space.load_segment(VirtAddr(0x10010), file.clone(), 0, 16, PAGE_SIZE - 16, true),
            Err(errno::EINVAL)
        );
        assert_eq!(
            space.load_segment(VirtAddr(0x10000), file.clone(), 0, 16, 16, true),
            Err(errno::EINVAL)
        );
        space
            .load_segment(VirtAddr(0x10000), file.clone(), 0, 16, PAGE_SIZE - 16, true)
            .unwrap();
        assert_eq!(
            space.load_segment(VirtAddr(0x10000), file.clone(), 0, 16, PAGE_SIZE - 16, true),
            Err(errno::EEXIST)
        );
        let backing = FileBacking {
            file,
            offset: 0,
            read_bytes: PAGE_SIZE + 1,
        };
        assert_eq!(
            space.map_file_page(VirtPageNum(0x20), backing, true),
            Err(errno::EINVAL)
        );
    }
}
