//! Little endian codec for HCI parameters.
//!
//! Commands and events are plain byte layouts; everything multi-byte is little endian.

use bt_hci::param::BdAddr;

pub trait FixedSize: Sized {
    const SIZE: usize;
}

pub trait Type: Sized {
    fn size(&self) -> usize;
}

pub trait Encode: Type {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error>;
}

pub trait Decode<'d>: Type {
    fn decode(src: &'d [u8]) -> Result<Self, Error>;
}

impl<T: FixedSize> Type for T {
    fn size(&self) -> usize {
        Self::SIZE
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InsufficientSpace,
    InvalidValue,
}

impl FixedSize for u8 {
    const SIZE: usize = 1;
}

impl FixedSize for u16 {
    const SIZE: usize = 2;
}

impl FixedSize for u32 {
    const SIZE: usize = 4;
}

impl FixedSize for BdAddr {
    const SIZE: usize = 6;
}

impl Decode<'_> for u8 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        src.first().copied().ok_or(Error::InsufficientSpace)
    }
}

impl Decode<'_> for u16 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        match src {
            [a, b, ..] => Ok(u16::from_le_bytes([*a, *b])),
            _ => Err(Error::InsufficientSpace),
        }
    }
}

impl Decode<'_> for u32 {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        match src {
            [a, b, c, d, ..] => Ok(u32::from_le_bytes([*a, *b, *c, *d])),
            _ => Err(Error::InsufficientSpace),
        }
    }
}

impl Decode<'_> for BdAddr {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        if src.len() < 6 {
            return Err(Error::InsufficientSpace);
        }
        let mut raw = [0; 6];
        raw.copy_from_slice(&src[..6]);
        Ok(BdAddr::new(raw))
    }
}

impl Encode for u8 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest[0] = *self;
        Ok(())
    }
}

impl Encode for u16 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest.copy_from_slice(&self.to_le_bytes()[..]);
        Ok(())
    }
}

impl Encode for u32 {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest.copy_from_slice(&self.to_le_bytes()[..]);
        Ok(())
    }
}

impl Encode for BdAddr {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        dest.copy_from_slice(self.raw());
        Ok(())
    }
}

/// Reads a little endian `u16` at `pos`, or 0 when the packet is too short.
pub(crate) fn le16(packet: &[u8], pos: usize) -> u16 {
    packet.get(pos..).map(u16::decode).and_then(Result::ok).unwrap_or(0)
}

/// Reads a little endian 24 bit value at `pos`, or 0 when the packet is too short.
pub(crate) fn le24(packet: &[u8], pos: usize) -> u32 {
    match packet.get(pos..pos + 3) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], 0]),
        None => 0,
    }
}

/// Reads a little endian `u32` at `pos`, or 0 when the packet is too short.
pub(crate) fn le32(packet: &[u8], pos: usize) -> u32 {
    packet.get(pos..).map(u32::decode).and_then(Result::ok).unwrap_or(0)
}

/// Reads a byte at `pos`, or 0 when the packet is too short.
pub(crate) fn byte(packet: &[u8], pos: usize) -> u8 {
    packet.get(pos).copied().unwrap_or(0)
}

/// Reads a device address at `pos`, or the zero address when the packet is too short.
pub(crate) fn bd_addr(packet: &[u8], pos: usize) -> BdAddr {
    packet
        .get(pos..)
        .map(BdAddr::decode)
        .and_then(Result::ok)
        .unwrap_or(BdAddr::new([0; 6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_rejected() {
        assert_eq!(u16::decode(&[1]), Err(Error::InsufficientSpace));
        assert_eq!(u32::decode(&[1, 2, 3]), Err(Error::InsufficientSpace));
        assert_eq!(u8::decode(&[]), Err(Error::InsufficientSpace));
    }

    #[test]
    fn packet_readers_default_to_zero() {
        let packet = [0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00];
        assert_eq!(le16(&packet, 3), 0x0c03);
        assert_eq!(le16(&packet, 5), 0);
        assert_eq!(le24(&[0x33, 0x8b, 0x9e], 0), 0x9e8b33);
        assert_eq!(byte(&packet, 10), 0);
        assert_eq!(bd_addr(&packet, 2).raw(), &[0u8; 6][..]);
    }
}
