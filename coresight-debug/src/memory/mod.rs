use crate::architecture::arm::ap::AccessPortError;

/// An interface to be implemented for drivers that allow target memory access.
pub trait MemoryInterface<ERR = AccessPortError> {
    /// Read a 32bit word of at `address`.
    ///
    /// The address where the read should be performed at has to be a multiple of 4.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn read_word_32(&mut self, address: u32) -> Result<u32, ERR>;

    /// Read a 16bit word of at `address`.
    ///
    /// The address where the read should be performed at has to be a multiple of 2.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn read_word_16(&mut self, address: u32) -> Result<u16, ERR>;

    /// Read an 8bit word of at `address`.
    fn read_word_8(&mut self, address: u32) -> Result<u8, ERR>;

    /// Read a block of 32bit words at `address`.
    ///
    /// The number of words read is `data.len()`.
    /// The address where the read should be performed at has to be a multiple of 4.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), ERR>;

    /// Read a block of bytes at `address`, with no alignment requirement.
    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), ERR>;

    /// Read `len` bytes starting at `address`.
    fn read_bulk(&mut self, address: u32, len: usize) -> Result<Vec<u8>, ERR> {
        let mut data = vec![0u8; len];
        self.read(address, &mut data)?;
        Ok(data)
    }

    /// Write a 32bit word at `address`.
    ///
    /// The address where the write should be performed at has to be a multiple of 4.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), ERR>;

    /// Write a 16bit word at `address`.
    ///
    /// The address where the write should be performed at has to be a multiple of 2.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), ERR>;

    /// Write an 8bit word at `address`.
    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), ERR>;

    /// Write a block of 32bit words at `address`.
    ///
    /// The number of words written is `data.len()`.
    /// The address where the write should be performed at has to be a multiple of 4.
    /// Returns [`AccessPortError::MemoryNotAligned`] if this does not hold true.
    fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), ERR>;

    /// Write a block of bytes at `address`, with no alignment requirement.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), ERR>;

    /// Write `data` starting at `address`.
    fn write_bulk(&mut self, address: u32, data: &[u8]) -> Result<(), ERR> {
        self.write(address, data)
    }

    /// Returns whether the current platform supports native 8bit transfers.
    fn supports_8bit_transfers(&self) -> bool;
}
