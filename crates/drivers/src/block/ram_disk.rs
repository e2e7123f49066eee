use alloc::{vec, vec::Vec};

use common::config::SECTOR_SIZE;
use defines::error::{errno, KResult};
use klocks::SpinMutex;

use super::BlockDevice;

/// 内存中的块设备，供宿主环境与测试使用
pub struct RamDisk {
    data: SpinMutex<Vec<u8>>,
    num_sectors: usize,
}

impl RamDisk {
    pub fn new(num_sectors: usize) -> Self {
        Self {
            data: SpinMutex::new(vec![0; num_sectors * SECTOR_SIZE]),
            num_sectors,
        }
    }

    /// 容量为 `bytes` 向下取整到扇区
    pub fn with_capacity(bytes: usize) -> Self {
        Self::new(bytes / SECTOR_SIZE)
    }

    fn range(&self, sector: usize, len: usize) -> KResult<core::ops::Range<usize>> {
        if sector >= self.num_sectors || len != SECTOR_SIZE {
            return Err(errno::EIO);
        }
        let start = sector * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> KResult<()> {
        let range = self.range(sector, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> KResult<()> {
        let range = self.range(sector, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
