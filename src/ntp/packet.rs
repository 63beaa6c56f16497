//! SNTP wire helpers: request layout and transmit timestamp decoding

/// Size of an NTP packet without extension fields
pub const PACKET_LEN: usize = 48;

/// LI=0, VN=3, Mode=3 (client)
pub const CLIENT_MODE_V3: u8 = 0x1b;

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch)
pub const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

/// Word index of the transmit timestamp seconds field
pub const TRANSMIT_SECS_WORD: usize = 10;

/// Byte offset of the transmit timestamp seconds field
const TRANSMIT_SECS_OFFSET: usize = TRANSMIT_SECS_WORD * 4;

/// A reply must be strictly longer than this to carry the transmit seconds
pub const MIN_REPLY_LEN: usize = TRANSMIT_SECS_OFFSET;

/// Build a client request packet
#[inline]
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_MODE_V3;
    packet
}

/// Big-endian 32-bit word to host order
#[inline]
pub const fn be_u32(bytes: [u8; 4]) -> u32 {
    ((bytes[0] as u32) << 24)
        | ((bytes[1] as u32) << 16)
        | ((bytes[2] as u32) << 8)
        | bytes[3] as u32
}

/// Convert NTP-era seconds to Unix seconds
#[inline]
pub const fn ntp_to_unix(ntp_secs: u32) -> i64 {
    ntp_secs as i64 - NTP_UNIX_OFFSET_SECS
}

/// Decode the transmit timestamp of a reply as Unix seconds.
///
/// Only the first `len` bytes of `buf` count as received. Returns `None` when
/// they stop short of the end of word 10; the rest of the packet is not
/// inspected, so a truncated reply is accepted as long as the field is there.
pub fn transmit_unix_secs(buf: &[u8], len: usize) -> Option<i64> {
    let received = &buf[..len.min(buf.len())];
    if received.len() <= MIN_REPLY_LEN {
        return None;
    }

    let mut word = [0u8; 4];
    for (i, byte) in word.iter_mut().enumerate() {
        // Bytes past the received length read as zero
        *byte = received.get(TRANSMIT_SECS_OFFSET + i).copied().unwrap_or(0);
    }

    Some(ntp_to_unix(be_u32(word)))
}
