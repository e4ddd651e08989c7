use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
};

use rsext4::error::{BlockDevError, BlockDevResult};
use rsext4::BlockDevice;

/// Byte-addressed window `[start, start + len)` of a device or image.
pub struct PartitionIo {
    file: File,
    start: u64,
    len: u64,
    pos: u64,
}

impl PartitionIo {
    pub fn new(file: File, start: u64, len: u64) -> Self {
        Self {
            file,
            start,
            len,
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush everything written through this window to the device.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn clamp_pos(&self, pos: i128) -> io::Result<u64> {
        if pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid seek"));
        }
        let pos = pos as u64;
        if pos > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"));
        }
        Ok(pos)
    }
}

impl Read for PartitionIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let to_read = (self.len - self.pos).min(buf.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.file.read(&mut buf[..to_read])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for PartitionIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "no space"));
        }
        let to_write = (self.len - self.pos).min(buf.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.file.write(&buf[..to_write])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for PartitionIo {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(off) => self.clamp_pos(off as i128)?,
            SeekFrom::End(off) => self.clamp_pos(self.len as i128 + off as i128)?,
            SeekFrom::Current(off) => self.clamp_pos(self.pos as i128 + off as i128)?,
        };
        Ok(self.pos)
    }
}

/// Block-addressed view over a [`PartitionIo`] for the ext formatter.
pub struct PartitionBlockDev {
    io: PartitionIo,
    total_blocks: u64,
    block_size: u32,
    opened: bool,
}

impl PartitionBlockDev {
    pub fn new(file: File, offset: u64, total_blocks: u64, block_size: u32) -> Self {
        let len = total_blocks * u64::from(block_size);
        Self {
            io: PartitionIo::new(file, offset, len),
            total_blocks,
            block_size,
            opened: true,
        }
    }

    fn locate(&mut self, buffer_len: usize, block_id: u32, count: u32) -> BlockDevResult<usize> {
        if !self.opened {
            return Err(BlockDevError::DeviceClosed);
        }
        let end = u64::from(block_id) + u64::from(count);
        if end > self.total_blocks {
            return Err(BlockDevError::BlockOutOfRange {
                block_id,
                max_blocks: self.total_blocks,
            });
        }
        let required = self.block_size as usize * count as usize;
        if buffer_len < required {
            return Err(BlockDevError::BufferTooSmall {
                provided: buffer_len,
                required,
            });
        }
        self.io
            .seek(SeekFrom::Start(u64::from(block_id) * u64::from(self.block_size)))
            .map_err(|_| BlockDevError::IoError)?;
        Ok(required)
    }
}

impl BlockDevice for PartitionBlockDev {
    fn write(&mut self, buffer: &[u8], block_id: u32, count: u32) -> BlockDevResult<()> {
        let required = self.locate(buffer.len(), block_id, count)?;
        self.io
            .write_all(&buffer[..required])
            .map_err(|_| BlockDevError::WriteError)
    }

    fn read(&mut self, buffer: &mut [u8], block_id: u32, count: u32) -> BlockDevResult<()> {
        let required = self.locate(buffer.len(), block_id, count)?;
        self.io
            .read_exact(&mut buffer[..required])
            .map_err(|_| BlockDevError::ReadError)
    }

    fn open(&mut self) -> BlockDevResult<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> BlockDevResult<()> {
        self.opened = false;
        Ok(())
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn flush(&mut self) -> BlockDevResult<()> {
        self.io.sync().map_err(|_| BlockDevError::IoError)
    }

    fn is_open(&self) -> bool {
        self.opened
    }
}
