use std::io::Read;

/// Types that know how to turn themselves into a fixed-width byte buffer.
pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

/// Types that know how to read themselves back out of a byte stream.
pub trait Decodeable {
    fn decode_from<R: Read>(reader: &mut R) -> Self;
}

fn read_exact_buf<R: Read>(reader: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).expect("unexpected EOF decoding a fixed-width field");
    buf
}

macro_rules! impl_serialization {
    ($t:ty, $len:expr) => {
        impl Encodeable for $t {
            fn encode(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
        }

        impl Decodeable for $t {
            fn decode_from<R: Read>(reader: &mut R) -> Self {
                let buf = read_exact_buf(reader, $len);
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&buf);
                <$t>::from_le_bytes(arr)
            }
        }
    };
}

impl_serialization!(i8, 1);
impl_serialization!(u8, 1);
impl_serialization!(i16, 2);
impl_serialization!(u16, 2);
impl_serialization!(i32, 4);
impl_serialization!(u32, 4);
impl_serialization!(i64, 8);
impl_serialization!(u64, 8);

impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![if *self { 1 } else { 0 }]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        read_exact_buf(reader, 1)[0] != 0
    }
}

/// Writes little-endian `n` into `buf[offset..offset+len]`. Used for
/// in-place page-byte manipulation where a `Vec<u8>` round-trip through
/// [`Encodeable`] would be wasteful.
pub fn write_le_i32(buf: &mut [u8], offset: usize, n: i32) {
    buf[offset..offset + 4].copy_from_slice(&n.to_le_bytes());
}

pub fn read_le_i32(buf: &[u8], offset: usize) -> i32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(arr)
}
