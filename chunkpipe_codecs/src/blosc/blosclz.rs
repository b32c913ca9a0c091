//! Decoder for BloscLZ, Blosc's built-in FastLZ-derived compressor.
//!
//! A stream is a sequence of instructions, each introduced by a control byte:
//! - `ctrl < 32`: a literal run of `ctrl + 1` bytes follows.
//! - `ctrl >= 32`: a back-reference. The top 3 bits hold the match length
//!   minus 2 (7 means more length bytes follow, each 255 meaning "continue"),
//!   the low 5 bits the high byte of the distance. One more byte completes
//!   the distance; the pair `31, 255` escapes to a 16-bit far distance.
//!
//! The first instruction is always a literal run.

use chunkpipe_core::CodecError;

use crate::frame::MAX_PREALLOC;

const MAX_DISTANCE: usize = 8191;

fn byte_at(input: &[u8], at: usize) -> Result<usize, CodecError> {
    input
        .get(at)
        .map(|&b| b as usize)
        .ok_or_else(|| CodecError::corrupt("blosclz stream ends inside an instruction"))
}

/// Decompress a BloscLZ stream that must expand to exactly `out_len` bytes.
pub fn decompress(input: &[u8], out_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(out_len.min(MAX_PREALLOC));
    if input.is_empty() {
        return Err(CodecError::corrupt("empty blosclz stream"));
    }
    let mut ip = 1;
    let mut ctrl = (input[0] & 31) as usize;

    loop {
        if ctrl >= 32 {
            let mut len = (ctrl >> 5) - 1;
            let ofs = (ctrl & 31) << 8;
            if len == 6 {
                loop {
                    let code = byte_at(input, ip)?;
                    ip += 1;
                    len += code;
                    if code != 255 {
                        break;
                    }
                }
            }
            let code = byte_at(input, ip)?;
            ip += 1;
            len += 3;

            let mut distance = ofs + code + 1;
            if code == 255 && ofs == 31 << 8 {
                let far = (byte_at(input, ip)? << 8) + byte_at(input, ip + 1)?;
                ip += 2;
                distance = far + MAX_DISTANCE + 1;
            }
            if distance > out.len() {
                return Err(CodecError::corrupt(format!(
                    "blosclz match distance {distance} reaches before the start of the output"
                )));
            }
            if out.len() + len > out_len {
                return Err(CodecError::corrupt("blosclz match overruns the block"));
            }
            // Byte by byte: source and destination may overlap.
            let from = out.len() - distance;
            for i in 0..len {
                let b = out[from + i];
                out.push(b);
            }
        } else {
            let len = ctrl + 1;
            let literal = input
                .get(ip..ip + len)
                .ok_or_else(|| CodecError::corrupt("blosclz literal run is truncated"))?;
            if out.len() + len > out_len {
                return Err(CodecError::corrupt("blosclz literal run overruns the block"));
            }
            out.extend_from_slice(literal);
            ip += len;
        }

        match input.get(ip) {
            Some(&next) => {
                ctrl = next as usize;
                ip += 1;
            }
            None => break,
        }
    }

    if out.len() != out_len {
        return Err(CodecError::corrupt(format!(
            "blosclz stream decoded to {} bytes, expected {out_len}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_then_run() {
        // "ab", then a match of length 6 at distance 2: "abababab".
        // ctrl = (6 - 2) << 5 | 0, distance byte = 2 - 1.
        let stream = [0x01, b'a', b'b', 4 << 5, 1];
        assert_eq!(decompress(&stream, 8).unwrap(), b"abababab");
    }

    #[test]
    fn long_match_length() {
        // "x" then a run of 1 + (7 - 1 + 3 + 10) = 20 x's (distance 1).
        let stream = [0x00, b'x', 7 << 5, 10, 0, 0x00, b'!'];
        let out = decompress(&stream, 21).unwrap();
        assert_eq!(&out[..20], &[b'x'; 20][..]);
        assert_eq!(out[20], b'!');
    }

    #[test]
    fn hostile_streams_are_rejected() {
        assert!(decompress(&[], 0).is_err());
        // literal run longer than the input
        assert!(decompress(&[0x05, 1, 2], 6).is_err());
        // match reaching before the output start
        assert!(decompress(&[0x00, b'a', 1 << 5, 9], 4).is_err());
        // output longer than declared
        assert!(decompress(&[0x02, 1, 2, 3], 2).is_err());
        // stream ends inside a match
        assert!(decompress(&[0x00, b'a', 2 << 5], 5).is_err());
        // wrong final size
        assert!(decompress(&[0x01, 1, 2], 3).is_err());
    }
}
