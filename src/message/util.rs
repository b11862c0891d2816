use std::io::prelude::*;

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Decode a little-endian f64 from the head of a buffer.
pub fn decode_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buf)
}

/// Read a little-endian u64 length prefix out of the given stream.
///
pub fn read_frame_len<R: Read>(stream: &mut R) -> std::io::Result<usize> {
    let mut buffer = [0; 8];
    read_bytes_into(stream, &mut buffer)?;
    Ok(u64::from_le_bytes(buffer) as usize)
}

/// Read the given number of bytes from a stream, into a vec.
///
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    read_bytes_into(stream, &mut buffer)?;
    Ok(buffer)
}

/// Fill up the given buffer by reading bytes from a stream.
///
pub fn read_bytes_into<R: Read>(stream: &mut R, buffer: &mut [u8]) -> std::io::Result<()> {
    let mut cursor = 0;
    while cursor < buffer.len() {
        let count = stream.read(&mut buffer[cursor..])?;
        if count == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed mid-frame",
            ));
        }
        cursor += count;
    }
    Ok(())
}

/// Write a length-prefixed frame to the given stream.
pub fn write_frame<W: Write>(stream: &mut W, message: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(message.len() as u64).to_le_bytes())?;
    stream.write_all(message)
}
