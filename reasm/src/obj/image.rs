/// the object file held in memory for the whole run. addresses are
/// file offsets; synthesized addresses (bss, extern slots) sit past
/// the end of the file and are not backed by bytes.
#[derive(Debug)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// backed range lookup, None for anything past the end of the file
    pub fn slice(&self, addr: u64, len: u64) -> Option<&[u8]> {
        let end = addr.checked_add(len)?;
        if end > self.bytes.len() as u64 {
            return None;
        }
        Some(&self.bytes[addr as usize..end as usize])
    }

    pub fn read_u32(&self, addr: u64) -> Option<u32> {
        let b = self.slice(addr, 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// false when the site is not backed
    pub fn write_u32(&mut self, addr: u64, value: u32) -> bool {
        match addr.checked_add(4) {
            Some(end) if end <= self.bytes.len() as u64 => {
                self.bytes[addr as usize..end as usize].copy_from_slice(&value.to_le_bytes());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let image = Image::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(image.len(), 5);
        assert_eq!(image.slice(0, 5).unwrap(), &[1, 2, 3, 4, 5]);
        assert_eq!(image.slice(4, 1).unwrap(), &[5]);
        assert!(image.slice(4, 2).is_none());
        assert!(image.slice(u64::MAX, 1).is_none());
    }

    #[test]
    fn words() {
        let mut image = Image::new(vec![0; 8]);
        assert!(image.write_u32(2, 0x11223344));
        assert_eq!(image.read_u32(2), Some(0x11223344));
        assert_eq!(image.bytes()[2..6], [0x44, 0x33, 0x22, 0x11]);
        assert!(!image.write_u32(5, 1));
        assert_eq!(image.read_u32(5), None);
    }
}
