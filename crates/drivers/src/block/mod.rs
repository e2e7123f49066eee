pub mod ram_disk;

use defines::error::KResult;

/// 块设备的抽象，读写都以扇区为单位进行
///
/// 多个线程可能同时访问同一个设备，实现需自行保证内部同步
pub trait BlockDevice: Send + Sync {
    fn sector_size(&self) -> usize;
    fn num_sectors(&self) -> usize;
    /// `buf` 的长度必须等于 [`BlockDevice::sector_size`]
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> KResult<()>;
    /// `buf` 的长度必须等于 [`BlockDevice::sector_size`]
    fn write_sector(&self, sector: usize, buf: &[u8]) -> KResult<()>;
}
