//! 请求调页的虚拟内存管理
//!
//! - [`FrameTable`]：固定数量的用户页帧，空闲页帧不足时以时钟算法换出
//! - [`SwapTable`]：块设备上的交换区
//! - [`SupplementalPageTable`]：每个地址空间中各虚拟页的来源
//! - [`Pager`]：以上三者的组合，负责处理缺页与回收地址空间的资源

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate kernel_tracer;

mod address;
mod evict;
mod fault;
mod file;
mod frame_table;
mod page_table;
mod pager;
mod space;
mod spt;
mod swap;
mod user_access;

pub use self::address::{VirtAddr, VirtPageNum};
pub use self::fault::PageFault;
pub use self::file::PagedFile;
pub use self::frame_table::{FrameBytes, FrameId, FrameTable};
pub use self::page_table::{PTEFlags, PageTable, PageTableEntry};
pub use self::pager::{Pager, VmConfig, VmStats};
pub use self::space::{SpaceStatus, UserSpace};
pub use self::spt::{FileBacking, PageInfo, PageKind, SupplementalPageTable};
pub use self::swap::{SwapMeta, SwapTable};
