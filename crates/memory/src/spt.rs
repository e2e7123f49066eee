//! 补充页表：记录每个虚拟页应当如何（重新）装入

use alloc::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};
use core::fmt;

use crate::{FrameId, PagedFile, VirtPageNum};

/// 页的来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// 从文件读取，剩余部分补零
    File,
    /// 内容在交换区中
    Swap,
    /// 栈页，首次装入时全零
    Stack,
}

#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<dyn PagedFile>,
    pub offset: usize,
    /// 需要从文件读取的字节数，不超过一页
    pub read_bytes: usize,
}

pub struct PageInfo {
    pub vpn: VirtPageNum,
    pub kind: PageKind,
    pub file: Option<FileBacking>,
    pub swap_slot: Option<usize>,
    pub writable: bool,
    /// 驻留时所在的页帧
    pub frame: Option<FrameId>,
}

impl PageInfo {
    pub fn file(vpn: VirtPageNum, backing: FileBacking, writable: bool) -> Self {
        Self {
            vpn,
            kind: PageKind::File,
            file: Some(backing),
            swap_slot: None,
            writable,
            frame: None,
        }
    }

    pub fn stack(vpn: VirtPageNum) -> Self {
        Self {
            vpn,
            kind: PageKind::Stack,
            file: None,
            swap_slot: None,
            writable: true,
            frame: None,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }
}

impl fmt::Debug for PageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageInfo")
            .field("vpn", &self.vpn)
            .field("kind", &self.kind)
            .field(
                "file",
                &self.file.as_ref().map(|b| (b.offset, b.read_bytes)),
            )
            .field("swap_slot", &self.swap_slot)
            .field("writable", &self.writable)
            .field("frame", &self.frame)
            .finish()
    }
}

#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<VirtPageNum, PageInfo>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&PageInfo> {
        self.pages.get(&vpn)
    }

    pub fn get_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageInfo> {
        self.pages.get_mut(&vpn)
    }

    /// 该页已有记录时不插入，返回 `false`
    pub fn insert(&mut self, info: PageInfo) -> bool {
        match self.pages.entry(info.vpn) {
            Entry::Vacant(entry) => {
                entry.insert(info);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<PageInfo> {
        self.pages.remove(&vpn)
    }

    /// 找到驻留在 `frame` 上的页
    pub fn find_by_frame(&self, frame: FrameId) -> Option<&PageInfo> {
        self.pages.values().find(|info| info.frame == Some(frame))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageInfo> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 取出全部记录
    pub fn take_all(&mut self) -> impl Iterator<Item = PageInfo> {
        core::mem::take(&mut self.pages).into_values()
    }
}
