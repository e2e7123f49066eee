use crate::constant::MiB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 块设备默认的扇区大小。实际大小以设备报告的为准
pub const SECTOR_SIZE: usize = 512;

/// 用户可用的物理页帧数量
pub const USER_FRAMES: usize = 1024;

/// 低地址的末端，即 256GiB 处。用户栈从这里向下增长
pub const USER_STACK_TOP: usize = 0x40_0000_0000;
/// 用户栈最多能增长到的大小
pub const USER_STACK_SIZE: usize = 8 * MiB;
/// 栈指针之下仍视为栈访问的字节数。
///
/// 一些指令（如 x86 的 `PUSHA`）会先访问栈指针下方 32 字节再移动栈指针
pub const STACK_SLACK: usize = 32;

pub const PRI_MIN: u8 = 0;
pub const PRI_DEFAULT: u8 = 31;
pub const PRI_MAX: u8 = 63;

const _: () = assert!(USER_STACK_SIZE % PAGE_SIZE == 0 && USER_STACK_TOP % PAGE_SIZE == 0);
const _: () = assert!(PAGE_SIZE % SECTOR_SIZE == 0);
