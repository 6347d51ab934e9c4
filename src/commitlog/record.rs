//! On-disk record layout shared by every log implementation, so all of them agree on ids.
//!
//! ```text
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 ... 13  | 14 ... 17 | 18 ...   |
//! +---+---+---+---+---+---+-----------+-----------+----------+
//! |      crc      |Vrs|Att| timestamp | data size |   data   |
//! +---------------+---+---+-----------+-----------+----------+
//! ```
//!
//! * `crc` - crc32 of everything after it, including data
//! * `Vrs` - version of the record format
//! * `Att` - attributes, currently always 0
//! * `timestamp` - millis since epoch, little endian i64
//! * `data size` - little endian u32
use std::io;

pub(super) const HEADER_SIZE: usize = 18;
const FORMAT_VERSION: u8 = 1;

pub(super) fn encoded_len(payload_len: usize) -> u64 {
    (HEADER_SIZE + payload_len) as u64
}

pub(super) fn encode(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.push(FORMAT_VERSION);
    bytes.push(0);
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);

    let crc = crc32fast::hash(&bytes[4..]);
    bytes[0..4].copy_from_slice(&crc.to_le_bytes());
    bytes
}

pub(super) struct Header {
    crc: u32,
    pub(super) timestamp: i64,
    pub(super) data_size: usize,
}

pub(super) fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<Header, io::Error> {
    if header[4] != FORMAT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unknown log record version {}", header[4]),
        ));
    }
    if header[5] != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unknown log record attributes {}", header[5]),
        ));
    }

    let mut crc = [0u8; 4];
    crc.copy_from_slice(&header[0..4]);
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&header[6..14]);
    let mut size = [0u8; 4];
    size.copy_from_slice(&header[14..18]);

    Ok(Header {
        crc: u32::from_le_bytes(crc),
        timestamp: i64::from_le_bytes(timestamp),
        data_size: u32::from_le_bytes(size) as usize,
    })
}

pub(super) fn verify(header_bytes: &[u8; HEADER_SIZE], header: &Header, data: &[u8]) -> Result<(), io::Error> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[4..]);
    hasher.update(data);
    if hasher.finalize() != header.crc {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Log record checksum mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_verify() {
        let bytes = encode(1234, b"hello");
        assert_eq!(bytes.len() as u64, encoded_len(5));

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = decode_header(&header_bytes).unwrap();
        assert_eq!(header.timestamp, 1234);
        assert_eq!(header.data_size, 5);
        verify(&header_bytes, &header, &bytes[HEADER_SIZE..]).unwrap();

        // flip a payload bit
        let mut corrupt = bytes[HEADER_SIZE..].to_vec();
        corrupt[0] ^= 1;
        assert!(verify(&header_bytes, &header, &corrupt).is_err());
    }
}
