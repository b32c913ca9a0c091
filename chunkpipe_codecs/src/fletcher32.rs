use chunkpipe_core::{CodecError, Filter};

use crate::FILTER_FLETCHER32;

/// HDF5 Fletcher-32 checksum filter (id 3).
///
/// Encoding appends a 4-byte little-endian checksum; decoding verifies and
/// strips it. Takes no parameters.
pub struct Fletcher32Filter;

impl Filter for Fletcher32Filter {
    fn id(&self) -> u32 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn decode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
        if input.len() < 4 {
            return Err(CodecError::corrupt(format!(
                "fletcher32 chunk of {} bytes has no room for a checksum",
                input.len()
            )));
        }
        let (data, stored) = input.split_at(input.len() - 4);
        let computed = fletcher32(data);
        // Files written by early HDF5 releases carry the two halves byte-swapped.
        let swapped = u32::from_le_bytes([stored[1], stored[0], stored[3], stored[2]]);
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        if computed != stored && computed != swapped {
            return Err(CodecError::corrupt(format!(
                "fletcher32 mismatch: stored {stored:08x}, computed {computed:08x}"
            )));
        }
        Ok(data.to_vec())
    }

    fn encode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(input.len() + 4);
        out.extend_from_slice(input);
        out.extend_from_slice(&fletcher32(input).to_le_bytes());
        Ok(out)
    }

    fn can_encode(&self) -> bool {
        true
    }
}

/// Fletcher-32 over big-endian 16-bit words; an odd trailing byte counts as
/// the high half of a final word.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let words = data.chunks_exact(2);
    let odd = words.remainder().first().copied();

    // 360 words keep both sums below 2^32 between reductions.
    let mut pending = 0;
    for word in words {
        sum1 += u32::from(u16::from_be_bytes([word[0], word[1]]));
        sum2 += sum1;
        pending += 1;
        if pending == 360 {
            sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
            sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
            pending = 0;
        }
    }
    if pending > 0 {
        sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
        sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    }
    if let Some(byte) = odd {
        sum1 += u32::from(byte) << 8;
        sum2 += sum1;
        sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
        sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    }
    sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
    sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    (sum2 << 16) | sum1
}
