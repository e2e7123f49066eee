use alloc::vec::Vec;

/// 可按页装入的文件，由文件系统一侧实现
pub trait PagedFile: Send + Sync {
    /// 从 `offset` 处读取到 `buf`，返回实际读到的字节数。越过文件末尾时读到的字节数会变少
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
}

/// 内存中的文件内容，主要用于测试与宿主环境
impl PagedFile for Vec<u8> {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(src) = self.get(offset..) else {
            return 0;
        };
        let len = src.len().min(buf.len());
        buf[..len].copy_from_slice(&src[..len]);
        len
    }
}
