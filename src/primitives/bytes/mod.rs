#![forbid(unsafe_code)]
//! Encoding and buffer utilities shared by keys, values and log frames.

pub mod ord {
    //! Order-preserving big-endian encoders.
    //!
    //! Every encoder appends to a `Vec<u8>` so keys can be built in one pass.

    /// Appends a big-endian u16.
    pub fn put_u16(dst: &mut Vec<u8>, v: u16) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian u32.
    pub fn put_u32(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian u64.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends an i64 as plain two's complement big-endian.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Smallest byte string strictly greater than every string starting with `prefix`.
    ///
    /// Returns `None` when no such bound exists (empty or all-`0xFF` prefix).
    pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
        let mut out = prefix.to_vec();
        while let Some(last) = out.pop() {
            if last != u8::MAX {
                out.push(last + 1);
                return Some(out);
            }
        }
        None
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing untrusted bytes.
    //!
    //! Reads return `None` instead of panicking so callers can map short
    //! buffers to their own corruption error.

    use core::fmt;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
            let end = self.off.checked_add(n)?;
            let slice = self.buf.get(self.off..end)?;
            self.off = end;
            Some(slice)
        }

        /// Takes exactly `N` bytes as an array.
        pub fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
            self.take(N)?.try_into().ok()
        }

        /// Reads a single byte.
        pub fn u8(&mut self) -> Option<u8> {
            self.array::<1>().map(|b| b[0])
        }

        /// Reads a big-endian u16.
        pub fn u16(&mut self) -> Option<u16> {
            self.array().map(u16::from_be_bytes)
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Option<u32> {
            self.array().map(u32::from_be_bytes)
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Option<u64> {
            self.array().map(u64::from_be_bytes)
        }

        /// Reads a big-endian i64.
        pub fn i64(&mut self) -> Option<i64> {
            self.array().map(i64::from_be_bytes)
        }

        /// Reads a u32 length prefix followed by that many bytes.
        pub fn len_prefixed(&mut self) -> Option<&'a [u8]> {
            let len = self.u32()? as usize;
            self.take(len)
        }

        /// Returns the next byte without consuming it.
        pub fn peek(&self) -> Option<u8> {
            self.buf.get(self.off).copied()
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Returns true once every byte has been consumed.
        pub fn is_empty(&self) -> bool {
            self.remaining() == 0
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
