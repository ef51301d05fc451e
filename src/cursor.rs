//! Cursors over a byte slice, used to lay out commands and to walk event parameters.

use crate::codec::{Decode, Encode, Error};

fn check(available: usize, needed: usize) -> Result<(), Error> {
    if available < needed {
        Err(Error::InsufficientSpace)
    } else {
        Ok(())
    }
}

/// Tracks how much of a command buffer has been filled.
pub struct WriteCursor<'d> {
    pos: usize,
    data: &'d mut [u8],
}

impl<'d> WriteCursor<'d> {
    pub fn new(data: &'d mut [u8]) -> Self {
        Self { pos: 0, data }
    }

    /// Splits the unwritten space into a header of `nbytes` and the rest.
    pub fn split(&mut self, nbytes: usize) -> Result<(WriteCursor<'_>, WriteCursor<'_>), Error> {
        check(self.available(), nbytes)?;
        let (header, body) = self.data[self.pos..].split_at_mut(nbytes);
        Ok((WriteCursor::new(header), WriteCursor::new(body)))
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        check(self.available(), bytes.len())?;
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn write<E: Encode>(&mut self, value: E) -> Result<(), Error> {
        let size = value.size();
        check(self.available(), size)?;
        value.encode(&mut self.data[self.pos..self.pos + size])?;
        self.pos += size;
        Ok(())
    }

    /// Writes `value` into the next `n` bytes.
    pub fn fill(&mut self, value: u8, n: usize) -> Result<(), Error> {
        check(self.available(), n)?;
        self.data[self.pos..self.pos + n].fill(value);
        self.pos += n;
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.pos
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct ReadCursor<'d> {
    pos: usize,
    data: &'d [u8],
}

impl<'d> ReadCursor<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self { pos: 0, data }
    }

    pub fn read<T: Decode<'d>>(&mut self) -> Result<T, Error> {
        let value = T::decode(&self.data[self.pos..])?;
        self.pos += value.size();
        Ok(value)
    }

    /// Takes the next `nbytes` bytes.
    pub fn slice(&mut self, nbytes: usize) -> Result<&'d [u8], Error> {
        check(self.available(), nbytes)?;
        let bytes = &self.data[self.pos..self.pos + nbytes];
        self.pos += nbytes;
        Ok(bytes)
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Everything not read yet.
    pub fn remaining(self) -> &'d [u8] {
        &self.data[self.pos..]
    }
}
