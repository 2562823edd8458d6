use byteorder::{ByteOrder, NativeEndian};
use proc_maps::{maps_contain_addr, MapRange};

use crate::core::types::{MemoryCopyError, ProcessMemory};

/**
 * Utility functions for copying memory out of a process
 */

pub const MAX_COPY_LENGTH: usize = 20_000_000;

const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// Typed reads over any `ProcessMemory` (a live process, or an in-memory image in tests).
///
/// When built with the target's memory maps, addresses outside every mapped region are rejected
/// without issuing a read.
pub struct Reader<'a, M: ProcessMemory> {
    source: &'a M,
    maps: Option<&'a [MapRange]>,
}

impl<'a, M: ProcessMemory> Reader<'a, M> {
    pub fn new(source: &'a M) -> Self {
        Reader { source, maps: None }
    }

    pub fn with_maps(source: &'a M, maps: &'a [MapRange]) -> Self {
        Reader {
            source,
            maps: Some(maps),
        }
    }

    pub fn read_bytes(&self, addr: usize, length: usize) -> Result<Vec<u8>, MemoryCopyError> {
        trace!("read_bytes: addr: {:x}, length: {}", addr, length);
        if length > MAX_COPY_LENGTH {
            return Err(MemoryCopyError::RequestTooLarge(length));
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        if addr == 0 {
            return Err(MemoryCopyError::InvalidAddressError(addr));
        }
        if let Some(maps) = self.maps {
            if !maps_contain_addr(addr, maps) {
                return Err(MemoryCopyError::InvalidAddressError(addr));
            }
        }
        let mut copy = vec![0; length];
        self.source
            .read(addr, &mut copy)
            .map_err(|e| copy_error(addr, e))?;
        Ok(copy)
    }

    pub fn read_word(&self, addr: usize) -> Result<u64, MemoryCopyError> {
        let bytes = self.read_bytes(addr, WORD_SIZE)?;
        Ok(NativeEndian::read_u64(&bytes))
    }

    /// Reads a pointer-sized field and returns it as an address
    pub fn read_pointer(&self, addr: usize) -> Result<usize, MemoryCopyError> {
        Ok(self.read_word(addr)? as usize)
    }

    pub fn read_u32(&self, addr: usize) -> Result<u32, MemoryCopyError> {
        let bytes = self.read_bytes(addr, std::mem::size_of::<u32>())?;
        Ok(NativeEndian::read_u32(&bytes))
    }

    pub fn read_f64(&self, addr: usize) -> Result<f64, MemoryCopyError> {
        let bytes = self.read_bytes(addr, std::mem::size_of::<f64>())?;
        Ok(NativeEndian::read_f64(&bytes))
    }

    pub fn read_words(&self, addr: usize, count: usize) -> Result<Vec<u64>, MemoryCopyError> {
        let length = count
            .checked_mul(WORD_SIZE)
            .ok_or(MemoryCopyError::RequestTooLarge(usize::MAX))?;
        let bytes = self.read_bytes(addr, length)?;
        let mut words = vec![0; count];
        NativeEndian::read_u64_into(&bytes, &mut words);
        Ok(words)
    }
}

/// `base + offset`. Addresses come out of the inspected process, so a corrupt pointer near the
/// top of the address space is an invalid address rather than an overflow.
pub fn field_address(base: usize, offset: usize) -> Result<usize, MemoryCopyError> {
    base.checked_add(offset).ok_or(MemoryCopyError::InvalidAddressError(base))
}

/// Address of element `index` of an array of `size` byte elements starting at `base`
pub fn element_address(base: usize, index: usize, size: usize) -> Result<usize, MemoryCopyError> {
    index
        .checked_mul(size)
        .and_then(|offset| base.checked_add(offset))
        .ok_or(MemoryCopyError::InvalidAddressError(base))
}

fn copy_error(addr: usize, error: remoteprocess::Error) -> MemoryCopyError {
    match error {
        remoteprocess::Error::IOError(e) => {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                return MemoryCopyError::PermissionDenied;
            }
            match e.raw_os_error() {
                Some(libc::ESRCH) => MemoryCopyError::ProcessEnded,
                // On *nix EFAULT means that the address was invalid
                Some(libc::EFAULT) => MemoryCopyError::InvalidAddressError(addr),
                _ => MemoryCopyError::Io(addr, e),
            }
        }
        other => MemoryCopyError::Message(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryImage;

    fn image() -> MemoryImage {
        let mut image = MemoryImage::new();
        let mut bytes = Vec::new();
        for w in [0x1122_3344_5566_7788u64, 42, 1.5f64.to_bits()] {
            bytes.extend_from_slice(&w.to_ne_bytes());
        }
        image.insert(0x1000, &bytes);
        image
    }

    #[test]
    fn test_typed_reads() {
        let image = image();
        let reader = Reader::new(&image);
        assert_eq!(reader.read_word(0x1000).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(reader.read_pointer(0x1008).unwrap(), 42);
        assert_eq!(reader.read_f64(0x1010).unwrap(), 1.5);
        assert_eq!(
            reader.read_words(0x1000, 2).unwrap(),
            vec![0x1122_3344_5566_7788, 42]
        );
        assert_eq!(reader.read_u32(0x1008).unwrap(), 42);
    }

    #[test]
    fn test_unmapped_address_is_invalid() {
        let image = image();
        let reader = Reader::new(&image);
        match reader.read_word(0x9000) {
            Err(MemoryCopyError::InvalidAddressError(addr)) => assert_eq!(addr, 0x9000),
            other => panic!("expected invalid address, got {:?}", other),
        }
        assert!(matches!(
            reader.read_word(0),
            Err(MemoryCopyError::InvalidAddressError(0))
        ));
    }

    #[test]
    fn test_address_arithmetic_never_wraps() {
        assert_eq!(field_address(0x1000, 0x18).unwrap(), 0x1018);
        assert!(matches!(
            field_address(usize::MAX - 7, 16),
            Err(MemoryCopyError::InvalidAddressError(_))
        ));
        assert_eq!(element_address(0x1000, 3, 8).unwrap(), 0x1018);
        assert!(element_address(0x1000, usize::MAX / 2, 8).is_err());
        assert!(element_address(usize::MAX - 15, 2, 8).is_err());
    }

    #[test]
    fn test_request_too_large() {
        let image = image();
        let reader = Reader::new(&image);
        assert!(matches!(
            reader.read_bytes(0x1000, MAX_COPY_LENGTH + 1),
            Err(MemoryCopyError::RequestTooLarge(_))
        ));
        assert!(matches!(
            reader.read_words(0x1000, usize::MAX),
            Err(MemoryCopyError::RequestTooLarge(_))
        ));
    }
}
