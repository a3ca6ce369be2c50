/// Advertising payload construction and parsing
///
/// The broadcast is a fixed sequence of AD records:
///
/// ```text
/// 11 07 <16-byte service UUID>   128-bit service UUID list
/// 02 01 06                       flags: LE general discoverable, no BR/EDR
/// 02 0a 00                       tx power: 0 dBm
/// 06 ff ff 03 <3 random bytes>   manufacturer data: marker + nonce
/// ```
///
/// The nonce is drawn fresh for every advertising session so consecutive
/// broadcasts cannot be linked by content. Scanners use it as a cheap
/// "random hash" to skip peers they already talked to.

use crate::transport::ble::gatt::ServiceUuid;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

/// Legacy advertisement size limit
pub const MAX_ADV_LEN: usize = 31;

/// AD type: complete list of 128-bit service UUIDs
pub const AD_TYPE_UUID128_LIST: u8 = 0x07;
/// AD type: flags
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: shortened local name
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// AD type: tx power level
pub const AD_TYPE_TX_POWER: u8 = 0x0a;
/// AD type: manufacturer specific data
pub const AD_TYPE_MANUFACTURER: u8 = 0xff;

/// LE General Discoverable | BR/EDR Not Supported
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Company-ID bytes that mark our manufacturer record
pub const MANUFACTURER_MARKER: [u8; 2] = [0xff, 0x03];

/// Nonce bytes per broadcast
pub const NONCE_LEN: usize = 3;

/// Errors for payload operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Advertisement of {len} bytes exceeds the {max}-byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("Adapter name of {0} bytes does not fit a scan response")]
    NameTooLong(usize),
}

/// One `[len][type][data]` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdRecord<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD records of a raw advertisement
///
/// Zero-length records are padding and skipped. A record whose declared
/// length runs past the buffer ends the iteration.
pub struct AdRecords<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> AdRecords<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for AdRecords<'a> {
    type Item = AdRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let size = *self.buf.get(self.offset)? as usize;
            if size == 0 {
                self.offset += 1;
                continue;
            }
            let start = self.offset + 1;
            let end = start + size;
            if end > self.buf.len() {
                self.offset = self.buf.len();
                return None;
            }
            self.offset = end;
            return Some(AdRecord {
                ad_type: self.buf[start],
                data: &self.buf[start + 1..end],
            });
        }
    }
}

/// Extract the random hash from a raw advertisement
///
/// Looks for the first manufacturer record whose payload starts with
/// [`MANUFACTURER_MARKER`] and decodes the bytes after the marker as a
/// little-endian integer (at most 8 bytes are used). Advertisements without
/// such a record yield 0.
pub fn find_rand_hash(advertisement: &[u8]) -> u64 {
    AdRecords::new(advertisement)
        .find(|r| {
            r.ad_type == AD_TYPE_MANUFACTURER
                && r.data.len() >= MANUFACTURER_MARKER.len()
                && r.data[..MANUFACTURER_MARKER.len()] == MANUFACTURER_MARKER
        })
        .map(|r| decode_le(&r.data[MANUFACTURER_MARKER.len()..]))
        .unwrap_or(0)
}

fn decode_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

/// True if the service UUID bytes appear verbatim in the advertisement
pub fn contains_service_uuid(advertisement: &[u8], uuid: &ServiceUuid) -> bool {
    advertisement
        .windows(uuid.as_bytes().len())
        .any(|w| w == uuid.as_bytes())
}

/// Scan response carrying the adapter name
pub fn scan_response(name: &str) -> Result<Vec<u8>, PayloadError> {
    let name = name.as_bytes();
    if name.len() + 2 > MAX_ADV_LEN {
        return Err(PayloadError::NameTooLong(name.len()));
    }
    let mut out = Vec::with_capacity(name.len() + 2);
    out.push(name.len() as u8 + 1);
    out.push(AD_TYPE_SHORT_NAME);
    out.extend_from_slice(name);
    Ok(out)
}

/// Broadcast packet for one advertising session
#[derive(Clone, PartialEq, Eq)]
pub struct AdvertisingPayload {
    bytes: Vec<u8>,
    nonce: [u8; NONCE_LEN],
}

impl AdvertisingPayload {
    /// Build a payload with a fresh nonce drawn from `rng`
    pub fn build<R: RngCore + ?Sized>(
        service_uuid: &ServiceUuid,
        tx_power_dbm: i8,
        rng: &mut R,
    ) -> Result<Self, PayloadError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let uuid = service_uuid.as_bytes();
        let mut bytes = Vec::with_capacity(MAX_ADV_LEN);
        bytes.extend_from_slice(&[uuid.len() as u8 + 1, AD_TYPE_UUID128_LIST]);
        bytes.extend_from_slice(uuid);
        bytes.extend_from_slice(&[0x02, AD_TYPE_FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
        bytes.extend_from_slice(&[0x02, AD_TYPE_TX_POWER, tx_power_dbm as u8]);
        bytes.extend_from_slice(&[
            (1 + MANUFACTURER_MARKER.len() + NONCE_LEN) as u8,
            AD_TYPE_MANUFACTURER,
        ]);
        bytes.extend_from_slice(&MANUFACTURER_MARKER);
        bytes.extend_from_slice(&nonce);

        if bytes.len() > MAX_ADV_LEN {
            return Err(PayloadError::TooLarge {
                len: bytes.len(),
                max: MAX_ADV_LEN,
            });
        }

        Ok(Self { bytes, nonce })
    }

    /// Raw advertisement bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The per-session nonce
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        self.nonce
    }

    /// Hash a scanner will extract from this payload
    pub fn rand_hash(&self) -> u64 {
        decode_le(&self.nonce)
    }
}

impl fmt::Debug for AdvertisingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdvertisingPayload({})", hex::encode(&self.bytes))
    }
}

impl fmt::Display for AdvertisingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn default_uuid() -> ServiceUuid {
        ServiceUuid::default()
    }

    #[test]
    fn test_payload_layout_is_byte_exact() {
        let mut rng = StdRng::seed_from_u64(1);
        let payload = AdvertisingPayload::build(&default_uuid(), 0, &mut rng).unwrap();
        let bytes = payload.as_bytes();

        assert_eq!(bytes.len(), 31);
        assert_eq!(&bytes[0..2], &[0x11, 0x07]);
        assert_eq!(&bytes[2..18], default_uuid().as_bytes());
        assert_eq!(&bytes[18..21], &[0x02, 0x01, 0x06]);
        assert_eq!(&bytes[21..24], &[0x02, 0x0a, 0x00]);
        assert_eq!(&bytes[24..28], &[0x06, 0xff, 0xff, 0x03]);
        assert_eq!(&bytes[28..31], &payload.nonce());
    }

    #[test]
    fn test_payload_nonce_changes_between_sessions() {
        let mut rng = StdRng::seed_from_u64(99);
        let a = AdvertisingPayload::build(&default_uuid(), 0, &mut rng).unwrap();
        let b = AdvertisingPayload::build(&default_uuid(), 0, &mut rng).unwrap();
        assert_eq!(&a.as_bytes()[..28], &b.as_bytes()[..28]);
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_scanner_recovers_builder_hash() {
        let mut rng = StdRng::seed_from_u64(5);
        let payload = AdvertisingPayload::build(&default_uuid(), 0, &mut rng).unwrap();
        assert_eq!(find_rand_hash(payload.as_bytes()), payload.rand_hash());
    }

    #[test]
    fn test_find_rand_hash_decodes_little_endian() {
        let buf = [0x06, 0xff, 0xff, 0x03, 0x01, 0x02, 0x03];
        assert_eq!(find_rand_hash(&buf), 0x030201);
    }

    #[test]
    fn test_find_rand_hash_skips_other_records() {
        let buf = [
            0x02, 0x01, 0x06, // flags
            0x05, 0xff, 0x4c, 0x00, 0x10, 0x20, // someone else's manufacturer data
            0x04, 0xff, 0xff, 0x03, 0xaa, // ours, one nonce byte
        ];
        assert_eq!(find_rand_hash(&buf), 0xaa);
    }

    #[test]
    fn test_find_rand_hash_without_marker_is_zero() {
        assert_eq!(find_rand_hash(&[0x02, 0x01, 0x06, 0x02, 0x0a, 0x00]), 0);
        assert_eq!(find_rand_hash(&[]), 0);
    }

    #[test]
    fn test_find_rand_hash_tolerates_truncation() {
        // Declared length runs past the end of the buffer.
        assert_eq!(find_rand_hash(&[0x06, 0xff, 0xff, 0x03, 0x01]), 0);
        assert_eq!(find_rand_hash(&[0x09]), 0);
    }

    #[test]
    fn test_ad_records_skip_padding() {
        let buf = [0x00, 0x00, 0x02, 0x01, 0x06, 0x00];
        let records: Vec<_> = AdRecords::new(&buf).collect();
        assert_eq!(
            records,
            vec![AdRecord {
                ad_type: 0x01,
                data: &[0x06]
            }]
        );
    }

    #[test]
    fn test_contains_service_uuid() {
        let mut rng = StdRng::seed_from_u64(3);
        let payload = AdvertisingPayload::build(&default_uuid(), 0, &mut rng).unwrap();
        assert!(contains_service_uuid(payload.as_bytes(), &default_uuid()));
        let other = ServiceUuid::from_bytes([0x11; 16]);
        assert!(!contains_service_uuid(payload.as_bytes(), &other));
    }

    #[test]
    fn test_scan_response_carries_name() {
        let sr = scan_response("Simmel").unwrap();
        assert_eq!(sr, vec![7, 0x08, b'S', b'i', b'm', b'm', b'e', b'l']);
    }

    #[test]
    fn test_scan_response_rejects_long_name() {
        let name = "x".repeat(30);
        assert_eq!(scan_response(&name), Err(PayloadError::NameTooLong(30)));
        assert!(scan_response(&"x".repeat(29)).is_ok());
    }

    proptest! {
        #[test]
        fn prop_payload_fits_and_carries_uuid(uuid in any::<[u8; 16]>(), seed in any::<u64>()) {
            let uuid = ServiceUuid::from_bytes(uuid);
            let mut rng = StdRng::seed_from_u64(seed);
            let payload = AdvertisingPayload::build(&uuid, 0, &mut rng).unwrap();
            prop_assert!(payload.len() <= MAX_ADV_LEN);
            prop_assert!(contains_service_uuid(payload.as_bytes(), &uuid));
            prop_assert_eq!(find_rand_hash(payload.as_bytes()), payload.rand_hash());
        }

        #[test]
        fn prop_find_rand_hash_decodes_trailing_bytes(tail in proptest::collection::vec(any::<u8>(), 1..=8)) {
            let mut buf = vec![(3 + tail.len()) as u8, 0xff, 0xff, 0x03];
            buf.extend_from_slice(&tail);
            let expected = tail
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            prop_assert_eq!(find_rand_hash(&buf), expected);
        }
    }
}
