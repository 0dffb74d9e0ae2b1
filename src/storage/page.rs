pub type PageId = u32;

pub const INVALID_PAGE_ID: PageId = 0;
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 16;

/// Page types recorded in the header.
pub const PAGE_TYPE_FREE: u16 = 0;
pub const PAGE_TYPE_DATA: u16 = 1;

/// Fixed-size unit of storage.
///
/// Layout: a 16-byte header (page id, type, slot count, free-space offset,
/// checksum, all little-endian) followed by an opaque payload. The header
/// lives inside the data buffer itself, so a page read back from disk
/// carries its header in the first 16 bytes.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        let mut page = Page {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_page_id(page_id);
        page.set_free_space_offset(PAGE_HEADER_SIZE as u32);
        page
    }

    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Self {
        Page {
            data: Box::new(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.data[0..4].copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn page_type(&self) -> u16 {
        u16::from_le_bytes(self.data[4..6].try_into().unwrap())
    }

    pub fn set_page_type(&mut self, page_type: u16) {
        self.data[4..6].copy_from_slice(&page_type.to_le_bytes());
    }

    pub fn num_slots(&self) -> u16 {
        u16::from_le_bytes(self.data[6..8].try_into().unwrap())
    }

    pub fn set_num_slots(&mut self, num_slots: u16) {
        self.data[6..8].copy_from_slice(&num_slots.to_le_bytes());
    }

    pub fn free_space_offset(&self) -> u32 {
        u32::from_le_bytes(self.data[8..12].try_into().unwrap())
    }

    pub fn set_free_space_offset(&mut self, offset: u32) {
        self.data[8..12].copy_from_slice(&offset.to_le_bytes());
    }

    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.data[12..16].try_into().unwrap())
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.data[12..16].copy_from_slice(&checksum.to_le_bytes());
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Payload area behind the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("page_type", &self.page_type())
            .field("free_space_offset", &self.free_space_offset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lives_in_data_buffer() {
        let mut page = Page::new(7);
        page.set_page_type(PAGE_TYPE_DATA);
        page.set_num_slots(3);
        page.set_free_space_offset(128);
        page.set_checksum(0xdead_beef);

        // Round-trip through the raw byte representation.
        let restored = Page::from_bytes(*page.data());
        assert_eq!(restored.page_id(), 7);
        assert_eq!(restored.page_type(), PAGE_TYPE_DATA);
        assert_eq!(restored.num_slots(), 3);
        assert_eq!(restored.free_space_offset(), 128);
        assert_eq!(restored.checksum(), 0xdead_beef);
    }

    #[test]
    fn payload_excludes_header() {
        let mut page = Page::new(1);
        page.payload_mut()[0] = 0xab;
        assert_eq!(page.data()[PAGE_HEADER_SIZE], 0xab);
        assert_eq!(page.payload().len(), PAGE_SIZE - PAGE_HEADER_SIZE);
    }
}
