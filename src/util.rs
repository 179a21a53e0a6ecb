use bytes::Buf;
use enumflags2::{BitFlag, BitFlags};
use num_traits::FromPrimitive;

use crate::Address;

/// Turns the `-1` convention of libc calls into an `io::Error` read from errno.
pub(crate) fn check_error<T: Ord + Default>(ret: T) -> std::io::Result<T> {
    if ret < T::default() {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

pub(crate) trait BufExt: Buf + Sized {
    fn get_address(&mut self) -> Address {
        Address::from_buf(self)
    }

    fn get_primitive_u8<T: FromPrimitive>(&mut self) -> Option<T> {
        FromPrimitive::from_u8(self.get_u8())
    }

    fn get_bool(&mut self) -> bool {
        self.get_u8() != 0
    }

    fn get_flags_u8<T: BitFlag<Numeric = u8>>(&mut self) -> BitFlags<T> {
        BitFlags::from_bits_truncate(self.get_u8())
    }

    fn get_flags_u32_le<T: BitFlag<Numeric = u32>>(&mut self) -> BitFlags<T> {
        BitFlags::from_bits_truncate(self.get_u32_le())
    }

    /// Reads a NUL-terminated string, consuming the terminator. Invalid
    /// UTF-8 is replaced rather than rejected.
    fn get_c_string(&mut self) -> String {
        let mut bytes = vec![];
        while self.has_remaining() {
            match self.get_u8() {
                0 => break,
                b => bytes.push(b),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<T: Buf> BufExt for T {}
