use byteorder::{ByteOrder, LittleEndian};

/// Fixed-width key for the B+-tree.
///
/// Keys are stored inline in page slots, so every key of a type occupies
/// exactly `ENCODED_SIZE` bytes. Ordering of the decoded values drives all
/// comparisons; the encoded form does not need to be order-preserving.
pub trait IndexKey: Clone + Ord + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Number of bytes a key occupies in a page slot
    const ENCODED_SIZE: usize;

    /// Write the key into `buf` (exactly `ENCODED_SIZE` bytes)
    fn encode(&self, buf: &mut [u8]);

    /// Read a key back out of `buf`
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}
