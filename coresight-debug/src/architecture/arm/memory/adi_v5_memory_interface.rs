use crate::architecture::arm::ap::{
    AccessPortError, ApAccess, DataSize, MemoryAp, CSW, DRW, TAR,
};
use crate::memory::MemoryInterface;
use crate::probe::DapAccess;

/// TAR auto-increment is only guaranteed to work inside a 1 KiB window.
const AUTO_INCREMENT_WINDOW: u32 = 0x400;

/// Memory access through a [`MemoryAp`].
///
/// This is a short lived handle that borrows the probe and the access port for the
/// duration of a group of transfers. The CSW and TAR caches live in the [`MemoryAp`],
/// so they survive from one handle to the next.
#[derive(Debug)]
pub struct ApMemory<'probe> {
    probe: &'probe mut dyn DapAccess,
    ap: &'probe mut MemoryAp,
}

impl<'probe> ApMemory<'probe> {
    pub fn new(probe: &'probe mut dyn DapAccess, ap: &'probe mut MemoryAp) -> Self {
        ApMemory { probe, ap }
    }

    pub fn access_port(&self) -> &MemoryAp {
        self.ap
    }

    /// Reborrow this handle for a shorter lifetime.
    pub fn reborrow(&mut self) -> ApMemory<'_> {
        ApMemory {
            probe: &mut *self.probe,
            ap: &mut *self.ap,
        }
    }

    /// Run `f`, dropping both register caches if it fails with a transport error.
    ///
    /// After a transport fault the hardware state of CSW and TAR is unknown.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, AccessPortError>,
    ) -> Result<T, AccessPortError> {
        let result = f(self);

        if let Err(e) = &result {
            if e.probe_error().is_some() {
                tracing::debug!(
                    "AP {}: transfer failed, invalidating CSW/TAR cache",
                    self.ap.port()
                );
                self.ap.invalidate_cache();
            }
        }

        result
    }

    fn select_size(&mut self, size: DataSize) -> Result<(), AccessPortError> {
        let csw = self.ap.csw_for(size);
        let raw = u32::from(csw);

        if self.ap.csw_cache != Some(raw) {
            self.probe.write_ap_register::<CSW>(self.ap.port(), csw)?;
            self.ap.csw_cache = Some(raw);
        }

        Ok(())
    }

    fn select_address(&mut self, address: u32) -> Result<(), AccessPortError> {
        if self.ap.tar_cache != Some(address) {
            self.probe
                .write_ap_register::<TAR>(self.ap.port(), TAR { address })?;
            self.ap.tar_cache = Some(address);
        }

        Ok(())
    }

    /// Record the TAR value after `bytes` were transferred starting at `address`.
    fn advance(&mut self, address: u32, bytes: u32) {
        let window = address & !(AUTO_INCREMENT_WINDOW - 1);

        self.ap.tar_cache = address
            .checked_add(bytes)
            .filter(|next| next & !(AUTO_INCREMENT_WINDOW - 1) == window);
    }

    fn read_drw(&mut self, address: u32, size: DataSize) -> Result<u32, AccessPortError> {
        self.select_size(size)?;
        self.select_address(address)?;

        let drw: DRW = self.probe.read_ap_register(self.ap.port())?;
        self.advance(address, size.to_byte_count());

        Ok(drw.data)
    }

    fn write_drw(&mut self, address: u32, size: DataSize, data: u32) -> Result<(), AccessPortError> {
        self.select_size(size)?;
        self.select_address(address)?;

        self.probe
            .write_ap_register::<DRW>(self.ap.port(), DRW { data })?;
        self.advance(address, size.to_byte_count());

        Ok(())
    }

    /// Number of words that can be moved from `address` before the end of the current
    /// auto-increment window.
    fn words_left_in_window(address: u32) -> usize {
        ((AUTO_INCREMENT_WINDOW - (address % AUTO_INCREMENT_WINDOW)) / 4) as usize
    }

    fn narrow_size(&self, address: u32, remaining: usize) -> DataSize {
        if address % 2 == 0 && remaining >= 2 && self.ap.supported_sizes().supports(DataSize::U16)
        {
            DataSize::U16
        } else {
            DataSize::U8
        }
    }
}

impl MemoryInterface for ApMemory<'_> {
    fn read_word_32(&mut self, address: u32) -> Result<u32, AccessPortError> {
        if (address % 4) != 0 {
            return Err(AccessPortError::alignment_error(address, 4));
        }

        self.guarded(|mem| mem.read_drw(address, DataSize::U32))
    }

    fn read_word_16(&mut self, address: u32) -> Result<u16, AccessPortError> {
        if (address % 2) != 0 {
            return Err(AccessPortError::alignment_error(address, 2));
        }

        // Offset of the halfword in the word (little endian)
        let bit_offset = (address % 4) * 8;

        let word = if self.ap.supported_sizes().supports(DataSize::U16) {
            self.guarded(|mem| mem.read_drw(address, DataSize::U16))?
        } else {
            self.read_word_32(address & !0x3)?
        };

        Ok(((word >> bit_offset) & 0xFFFF) as u16)
    }

    fn read_word_8(&mut self, address: u32) -> Result<u8, AccessPortError> {
        // Offset of byte in word (little endian)
        // See "Arm Debug Interface Architecture Specification ADIv5.0 to ADIv5.2", C2.2.6
        let bit_offset = (address % 4) * 8;

        let word = if self.ap.supported_sizes().supports(DataSize::U8) {
            self.guarded(|mem| mem.read_drw(address, DataSize::U8))?
        } else {
            self.read_word_32(address & !0x3)?
        };

        Ok(((word >> bit_offset) & 0xFF) as u8)
    }

    fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), AccessPortError> {
        if data.is_empty() {
            return Ok(());
        }

        if (address % 4) != 0 {
            return Err(AccessPortError::alignment_error(address, 4));
        }

        check_range(address, data.len() * 4)?;

        self.guarded(|mem| {
            let mut address = address;
            let mut offset = 0;

            while offset < data.len() {
                let chunk = Self::words_left_in_window(address).min(data.len() - offset);

                tracing::trace!("Reading chunk of {} words at {:#010x}", chunk, address);

                mem.select_size(DataSize::U32)?;
                mem.select_address(address)?;
                mem.probe.read_ap_register_repeated::<DRW>(
                    mem.ap.port(),
                    &mut data[offset..offset + chunk],
                )?;

                let bytes = (chunk * 4) as u32;
                mem.advance(address, bytes);
                address = address.wrapping_add(bytes);
                offset += chunk;
            }

            Ok(())
        })
    }

    fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), AccessPortError> {
        check_range(address, data.len())?;

        let mut address = address;
        let mut offset = 0;

        // Leading bytes up to the first word boundary.
        while offset < data.len() && address % 4 != 0 {
            let moved = self.read_narrow(address, &mut data[offset..])?;
            offset += moved;
            address = address.wrapping_add(moved as u32);
        }

        let words = (data.len() - offset) / 4;
        if words > 0 {
            let mut buffer = vec![0u32; words];
            self.read_32(address, &mut buffer)?;

            for (bytes, word) in data[offset..offset + words * 4]
                .chunks_exact_mut(4)
                .zip(buffer)
            {
                bytes.copy_from_slice(&word.to_le_bytes());
            }

            offset += words * 4;
            address = address.wrapping_add((words * 4) as u32);
        }

        // Trailing bytes.
        while offset < data.len() {
            let moved = self.read_narrow(address, &mut data[offset..])?;
            offset += moved;
            address = address.wrapping_add(moved as u32);
        }

        Ok(())
    }

    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), AccessPortError> {
        if (address % 4) != 0 {
            return Err(AccessPortError::alignment_error(address, 4));
        }

        self.guarded(|mem| mem.write_drw(address, DataSize::U32, data))
    }

    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), AccessPortError> {
        if (address % 2) != 0 {
            return Err(AccessPortError::alignment_error(address, 2));
        }

        let bit_offset = (address % 4) * 8;

        if self.ap.supported_sizes().supports(DataSize::U16) {
            self.guarded(|mem| {
                mem.write_drw(address, DataSize::U16, u32::from(data) << bit_offset)
            })
        } else {
            let aligned = address & !0x3;
            let word = self.read_word_32(aligned)?;
            let word = word & !(0xFFFF << bit_offset) | (u32::from(data) << bit_offset);

            self.write_word_32(aligned, word)
        }
    }

    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), AccessPortError> {
        let bit_offset = (address % 4) * 8;

        if self.ap.supported_sizes().supports(DataSize::U8) {
            self.guarded(|mem| mem.write_drw(address, DataSize::U8, u32::from(data) << bit_offset))
        } else {
            // Read the existing 32-bit word and insert the byte at the correct bit offset
            // See "Arm Debug Interface Architecture Specification ADIv5.0 to ADIv5.2", C2.2.6
            let aligned = address & !0x3;
            let word = self.read_word_32(aligned)?;
            let word = word & !(0xFF << bit_offset) | (u32::from(data) << bit_offset);

            self.write_word_32(aligned, word)
        }
    }

    fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), AccessPortError> {
        if data.is_empty() {
            return Ok(());
        }

        if (address % 4) != 0 {
            return Err(AccessPortError::alignment_error(address, 4));
        }

        check_range(address, data.len() * 4)?;

        self.guarded(|mem| {
            let mut address = address;
            let mut offset = 0;

            while offset < data.len() {
                let chunk = Self::words_left_in_window(address).min(data.len() - offset);

                tracing::trace!("Writing chunk of {} words at {:#010x}", chunk, address);

                mem.select_size(DataSize::U32)?;
                mem.select_address(address)?;
                mem.probe
                    .write_ap_register_repeated::<DRW>(mem.ap.port(), &data[offset..offset + chunk])?;

                let bytes = (chunk * 4) as u32;
                mem.advance(address, bytes);
                address = address.wrapping_add(bytes);
                offset += chunk;
            }

            Ok(())
        })
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), AccessPortError> {
        check_range(address, data.len())?;

        let mut address = address;
        let mut offset = 0;

        while offset < data.len() && address % 4 != 0 {
            let moved = self.write_narrow(address, &data[offset..])?;
            offset += moved;
            address = address.wrapping_add(moved as u32);
        }

        let words = (data.len() - offset) / 4;
        if words > 0 {
            let buffer: Vec<u32> = data[offset..offset + words * 4]
                .chunks_exact(4)
                .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .collect();
            self.write_32(address, &buffer)?;

            offset += words * 4;
            address = address.wrapping_add((words * 4) as u32);
        }

        while offset < data.len() {
            let moved = self.write_narrow(address, &data[offset..])?;
            offset += moved;
            address = address.wrapping_add(moved as u32);
        }

        Ok(())
    }

    fn supports_8bit_transfers(&self) -> bool {
        self.ap.supported_sizes().supports(DataSize::U8)
    }
}

impl ApMemory<'_> {
    /// Read one byte or halfword at the start of `data`, returning the number of bytes read.
    fn read_narrow(&mut self, address: u32, data: &mut [u8]) -> Result<usize, AccessPortError> {
        match self.narrow_size(address, data.len()) {
            DataSize::U16 => {
                let value = self.read_word_16(address)?;
                data[..2].copy_from_slice(&value.to_le_bytes());
                Ok(2)
            }
            _ => {
                data[0] = self.read_word_8(address)?;
                Ok(1)
            }
        }
    }

    /// Write one byte or halfword from the start of `data`, returning the number of bytes written.
    fn write_narrow(&mut self, address: u32, data: &[u8]) -> Result<usize, AccessPortError> {
        match self.narrow_size(address, data.len()) {
            DataSize::U16 => {
                self.write_word_16(address, u16::from_le_bytes([data[0], data[1]]))?;
                Ok(2)
            }
            _ => {
                self.write_word_8(address, data[0])?;
                Ok(1)
            }
        }
    }
}

/// Fails if a transfer of `len` bytes at `address` would run past the end of the 32 bit address space.
fn check_range(address: u32, len: usize) -> Result<(), AccessPortError> {
    let end = u64::from(address) + len as u64;

    if end > 1 << 32 {
        Err(AccessPortError::OutOfBounds)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::ap::{Register, SizeCapabilities};
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe};
    use crate::probe::DapError;
    use pretty_assertions::assert_eq;

    // Visually obvious pattern used to test memory writes
    const DATA8: &[u8] = &[
        128, 129, 130, 131, 132, 133, 134, 135, 136, 137, 138, 139, 140, 141, 142, 143,
    ];

    // DATA8 interpreted as little endian 32-bit words
    const DATA32: &[u32] = &[0x83828180, 0x87868584, 0x8b8a8988, 0x8f8e8d8c];

    const RAM: u32 = 0x2000_0000;

    fn probe_with(port: FakeAccessPort) -> (FakeProbe, MemoryAp) {
        let port = DATA32
            .iter()
            .enumerate()
            .fold(port, |port, (i, word)| port.with_word(RAM + 4 * i as u32, *word));

        let mut probe = FakeProbe::new();
        probe.add_access_port(port);
        let ap = MemoryAp::new(&mut probe, 0).unwrap();
        probe.clear_operations();

        (probe, ap)
    }

    #[test]
    fn read_word_32() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        for &offset in &[0, 4] {
            let value = mi.read_word_32(RAM + offset).expect("read_word_32 failed");
            assert_eq!(value, DATA32[offset as usize / 4]);
        }
    }

    #[test]
    fn read_word_8() {
        for sizes in [SizeCapabilities::ALL, SizeCapabilities::WORD_ONLY] {
            let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3().with_sizes(sizes));
            let mut mi = ApMemory::new(&mut probe, &mut ap);

            for offset in 0..8 {
                let value = mi
                    .read_word_8(RAM + offset)
                    .unwrap_or_else(|_| panic!("read_word_8 failed, offset = {}", offset));
                assert_eq!(value, DATA8[offset as usize], "offset = {}", offset);
            }
        }
    }

    #[test]
    fn write_word_8() {
        for sizes in [SizeCapabilities::ALL, SizeCapabilities::WORD_ONLY] {
            for offset in 0..8u32 {
                let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3().with_sizes(sizes));
                let mut mi = ApMemory::new(&mut probe, &mut ap);

                mi.write_word_8(RAM + offset, 0x55)
                    .unwrap_or_else(|_| panic!("write_word_8 failed, offset = {}", offset));

                let mut expected = DATA8.to_vec();
                expected[offset as usize] = 0x55;
                assert_eq!(
                    probe.access_port(0).read_bytes(RAM, DATA8.len()),
                    expected,
                    "offset = {}",
                    offset
                );
            }
        }
    }

    #[test]
    fn write_word_16_without_native_support() {
        let (mut probe, mut ap) =
            probe_with(FakeAccessPort::ahb3().with_sizes(SizeCapabilities::WORD_ONLY));
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        mi.write_word_16(RAM + 2, 0xBEEF).unwrap();

        assert_eq!(probe.access_port(0).read_word(RAM), 0xBEEF_8180);
    }

    #[test]
    fn unaligned_word_access_should_error() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        for &address in &[1, 3, 127] {
            assert!(matches!(
                mi.read_word_32(address),
                Err(AccessPortError::MemoryNotAligned { .. })
            ));
            assert!(mi.read_32(address, &mut [0u32; 4]).is_err());
            assert!(mi.write_32(address, &[0u32; 4]).is_err());
        }
        assert!(mi.read_word_16(RAM + 1).is_err());
    }

    #[test]
    fn csw_is_written_once_for_consecutive_accesses() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        for offset in [0, 4, 8, 12, 0] {
            mi.read_word_32(RAM + offset).unwrap();
        }

        assert_eq!(probe.register_writes(0, CSW::ADDRESS), 1);
        // Sequential reads ride on the auto increment, only the jump back needs a TAR write.
        assert_eq!(probe.register_writes(0, TAR::ADDRESS), 2);
    }

    #[test]
    fn size_change_rewrites_csw() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        mi.read_word_32(RAM).unwrap();
        mi.read_word_8(RAM + 5).unwrap();
        mi.read_word_32(RAM + 8).unwrap();

        assert_eq!(probe.register_writes(0, CSW::ADDRESS), 3);
    }

    #[test]
    fn block_read_splits_at_auto_increment_window() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let start = RAM + 0x3F8;
        probe.access_port_mut(0).write_word(RAM + 0x3FC, 0x1111_1111);
        probe.access_port_mut(0).write_word(RAM + 0x400, 0x2222_2222);

        let mut data = [0u32; 4];
        ApMemory::new(&mut probe, &mut ap)
            .read_32(start, &mut data)
            .unwrap();

        assert_eq!(data[1], 0x1111_1111);
        assert_eq!(data[2], 0x2222_2222);
        assert_eq!(probe.register_writes(0, TAR::ADDRESS), 2);
        assert_eq!(ap.tar_cache, Some(RAM + 0x408));
    }

    #[test]
    fn bulk_roundtrip_with_unaligned_edges() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let payload: Vec<u8> = (0..23).collect();

        let mut mi = ApMemory::new(&mut probe, &mut ap);
        mi.write_bulk(RAM + 0x101, &payload).unwrap();
        let read_back = mi.read_bulk(RAM + 0x101, payload.len()).unwrap();

        assert_eq!(read_back, payload);
        assert_eq!(probe.access_port(0).read_bytes(RAM + 0x101, 23), payload);
        // The byte in front of the block is untouched.
        assert_eq!(probe.access_port(0).read_bytes(RAM + 0x100, 1), vec![0]);
    }

    #[test]
    fn bulk_access_past_end_of_address_space() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        let mut mi = ApMemory::new(&mut probe, &mut ap);

        assert!(matches!(
            mi.read_bulk(0xFFFF_FFF0, 0x20),
            Err(AccessPortError::OutOfBounds)
        ));
    }

    #[test]
    fn transport_fault_invalidates_caches() {
        let (mut probe, mut ap) = probe_with(FakeAccessPort::ahb3());
        probe
            .access_port_mut(0)
            .fail_memory(RAM + 4, DapError::FaultResponse);

        let mut mi = ApMemory::new(&mut probe, &mut ap);
        mi.read_word_32(RAM).unwrap();
        let err = mi.read_word_32(RAM + 4).unwrap_err();

        assert!(err.probe_error().is_some());
        assert_eq!(ap.csw_cache, None);
        assert_eq!(ap.tar_cache, None);

        probe.clear_faults();
        probe.clear_operations();
        ApMemory::new(&mut probe, &mut ap)
            .read_word_32(RAM + 4)
            .unwrap();
        assert_eq!(probe.register_writes(0, CSW::ADDRESS), 1);
        assert_eq!(probe.register_writes(0, TAR::ADDRESS), 1);
    }
}
