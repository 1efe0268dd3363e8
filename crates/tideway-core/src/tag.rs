use std::time::{SystemTime, UNIX_EPOCH};

use crate::{error::CoreError, sentence::nmea_checksum};

/// Room for one formatted TAG block.
pub const TAG_MAX: usize = 64;

/// Formats an NMEA-0183 v4 TAG block `\s:<name>,c:<secs>*hh\` into `out`,
/// returning the formatted length. Fails when the block does not fit, in
/// which case the caller is expected to stop tagging.
pub fn gettag(name: &str, out: &mut [u8]) -> Result<usize, CoreError> {
    let secs =
        SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| CoreError::ClockSkew)?.as_secs();
    let body = format!("s:{name},c:{secs}");
    let block = format!("\\{body}*{:02X}\\", nmea_checksum(body.as_bytes()));
    if block.len() > out.len() {
        return Err(CoreError::TagOverflow);
    }
    out[..block.len()].copy_from_slice(block.as_bytes());
    Ok(block.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_valid_block() {
        let mut buf = [0u8; TAG_MAX];
        let n = gettag("gps", &mut buf).unwrap();
        let block = &buf[..n];
        assert_eq!(block[0], b'\\');
        assert_eq!(block[n - 1], b'\\');
        let inner = &block[1..n - 1];
        let star = inner.iter().position(|&b| b == b'*').unwrap();
        assert!(inner.starts_with(b"s:gps,c:"));
        let cs = u8::from_str_radix(std::str::from_utf8(&inner[star + 1..]).unwrap(), 16).unwrap();
        assert_eq!(cs, nmea_checksum(&inner[..star]));
    }

    #[test]
    fn overlong_name_fails() {
        let mut buf = [0u8; TAG_MAX];
        let name = "x".repeat(TAG_MAX);
        assert!(gettag(&name, &mut buf).is_err());
    }
}
