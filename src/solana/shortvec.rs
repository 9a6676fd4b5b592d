//! Compact vector-length encoding used by the transaction wire format.
//!
//! Lengths are encoded as a little-endian base-128 varint, one byte per
//! 7 bits, with the high bit marking continuation.

use std::io::{self, Read, Write};
use std::mem::size_of;

pub fn encode_len<W: Write>(writer: &mut W, len: usize) -> io::Result<()> {
    let mut rem_len = len;
    loop {
        let mut elem = (rem_len & 0x7f) as u8;
        rem_len >>= 7;
        if rem_len == 0 {
            writer.write_all(&[elem])?;
            break;
        } else {
            elem |= 0x80;
            writer.write_all(&[elem])?;
        }
    }
    Ok(())
}

pub fn decode_len<R: Read>(reader: &mut R) -> io::Result<usize> {
    let mut len: usize = 0;
    let mut size: usize = 0;
    loop {
        let mut elem = [0u8; 1];
        reader.read_exact(&mut elem)?;
        len |= (elem[0] as usize & 0x7f) << (size * 7);
        size += 1;
        if elem[0] as usize & 0x80 == 0 {
            break;
        }
        if size > size_of::<usize>() + 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shortvec length overflow",
            ));
        }
    }
    Ok(len)
}

pub fn serialize_vec_bytes<W: Write>(mut writer: W, input: &[u8]) -> io::Result<()> {
    encode_len(&mut writer, input.len())?;
    writer.write_all(input)?;
    Ok(())
}

pub fn deserialize_vec_bytes<R: Read>(mut reader: &mut R) -> io::Result<Vec<u8>> {
    let vec_len = decode_len(&mut reader)?;
    let mut buf = vec![0; vec_len];
    reader.read_exact(&mut buf[..])?;
    Ok(buf)
}
