//! Classify table geometry, match keys and entries.

use tunterm_types::{AddressFamily, IpAddress};

/// Width of one classifier vector in bytes.
pub const VECTOR_SIZE: usize = 16;

/// Largest match window any tunterm table uses (two vectors, IPv6).
pub const MAX_MATCH_BYTES: usize = 2 * VECTOR_SIZE;

/// Vectors skipped before the match window. The window then starts at
/// byte 80: outer Ethernet (14) + outer IPv4 (20) + UDP (8) + VXLAN (8) +
/// inner Ethernet (14) = 64, plus 16 into the inner IP header.
const TUNTERM_SKIP_VECTORS: u32 = 5;
const TUNTERM_NBUCKETS: u32 = 2;
const TUNTERM_MEMORY_SIZE: u32 = 2 << 22;

/// Offset of the inner destination address inside the match window.
/// IPv4 destination sits at inner-header offset 16 (window byte 0); IPv6 at
/// offset 24 (window byte 8).
const fn dst_offset_in_window(af: AddressFamily) -> usize {
    match af {
        AddressFamily::V4 => 0,
        AddressFamily::V6 => 8,
    }
}

/// Fixed geometry of a classify table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyGeometry {
    pub nbuckets: u32,
    pub memory_size: u32,
    pub skip_n_vectors: u32,
    pub match_n_vectors: u32,
    mask: [u8; MAX_MATCH_BYTES],
    /// Window bytes up to and including the last masked byte.
    masked_len: usize,
}

impl ClassifyGeometry {
    /// Geometry for a destination-address table of the given family:
    /// one match vector for IPv4, two for IPv6.
    pub fn for_family(af: AddressFamily) -> Self {
        let (match_n_vectors, addr_len) = match af {
            AddressFamily::V4 => (1, 4),
            AddressFamily::V6 => (2, 16),
        };
        let offset = dst_offset_in_window(af);
        let mut mask = [0u8; MAX_MATCH_BYTES];
        mask[offset..offset + addr_len].fill(0xff);

        Self {
            nbuckets: TUNTERM_NBUCKETS,
            memory_size: TUNTERM_MEMORY_SIZE,
            skip_n_vectors: TUNTERM_SKIP_VECTORS,
            match_n_vectors,
            mask,
            masked_len: offset + addr_len,
        }
    }

    /// Byte offset of the match window from the start of packet data.
    pub const fn skip_bytes(&self) -> usize {
        self.skip_n_vectors as usize * VECTOR_SIZE
    }

    /// Length of the match window in bytes.
    pub const fn match_bytes(&self) -> usize {
        self.match_n_vectors as usize * VECTOR_SIZE
    }

    /// First byte past the match window.
    pub const fn window_end(&self) -> usize {
        self.skip_bytes() + self.match_bytes()
    }

    /// Shortest packet data a key can be extracted from: the window start
    /// plus every masked byte. Bytes past the last masked one never take
    /// part in a match and need not be present.
    pub const fn key_end(&self) -> usize {
        self.skip_bytes() + self.masked_len
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask[..self.match_bytes()]
    }

    /// Builds the session match buffer for a destination address: a buffer
    /// laid out like a packet, with the address written at its fixed offset
    /// inside the match window and everything else zero.
    pub fn session_match(&self, dst: &IpAddress) -> Vec<u8> {
        let mut buf = vec![0u8; self.window_end()];
        let start = self.skip_bytes() + dst_offset_in_window(dst.family());
        let bytes = dst.as_bytes();
        buf[start..start + bytes.len()].copy_from_slice(&bytes);
        buf
    }

    /// Extracts the masked match window from packet-shaped data. Returns
    /// `None` when the data ends before the last masked byte; a window cut
    /// short after it keys as if zero-filled.
    pub fn extract_key(&self, data: &[u8]) -> Option<MatchKey> {
        let window = data.get(self.skip_bytes()..self.key_end())?;
        let mut key = [0u8; MAX_MATCH_BYTES];
        for (k, (b, m)) in key.iter_mut().zip(window.iter().zip(self.mask.iter())) {
            *k = b & m;
        }
        Some(MatchKey(key))
    }
}

/// A masked match window; the hash key of a classify session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey([u8; MAX_MATCH_BYTES]);

impl MatchKey {
    pub fn as_bytes(&self) -> &[u8; MAX_MATCH_BYTES] {
        &self.0
    }
}

/// Action recorded on a classify session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyAction {
    /// Plain hit, no action attached.
    None,
    /// Hit carries metadata (the redirect adjacency).
    SetMetadata,
}

/// Result record of a classify session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyEntry {
    pub action: ClassifyAction,
    pub metadata: u32,
}

impl ClassifyEntry {
    pub const fn set_metadata(metadata: u32) -> Self {
        Self {
            action: ClassifyAction::SetMetadata,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_v4_geometry() {
        let g = ClassifyGeometry::for_family(AddressFamily::V4);
        assert_eq!(g.skip_bytes(), 80);
        assert_eq!(g.match_bytes(), 16);
        assert_eq!(&g.mask()[..5], &[0xff, 0xff, 0xff, 0xff, 0x00]);
        assert_eq!(g.nbuckets, 2);
        assert_eq!(g.memory_size, 8 << 20);
    }

    #[test]
    fn test_v6_geometry_masks_destination() {
        let g = ClassifyGeometry::for_family(AddressFamily::V6);
        assert_eq!(g.match_bytes(), 32);
        let set: Vec<usize> = g
            .mask()
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == 0xff)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set, (8..24).collect::<Vec<_>>());
    }

    #[test]
    fn test_session_match_places_address() {
        let g = ClassifyGeometry::for_family(AddressFamily::V4);
        let buf = g.session_match(&"10.0.0.5".parse().unwrap());
        assert_eq!(buf.len(), 96);
        assert_eq!(&buf[80..84], &[10, 0, 0, 5]);
        assert!(buf[..80].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_extract_key_ignores_unmasked_bytes() {
        let g = ClassifyGeometry::for_family(AddressFamily::V4);
        let mut a = g.session_match(&"10.0.0.5".parse().unwrap());
        let b = a.clone();
        a[84] = 0xaa;
        a[10] = 0xbb;
        assert_eq!(g.extract_key(&a), g.extract_key(&b));
    }

    #[test]
    fn test_extract_key_short_data() {
        let g = ClassifyGeometry::for_family(AddressFamily::V6);
        assert_eq!(g.key_end(), 104);
        assert!(g.extract_key(&[0u8; 103]).is_none());
    }

    #[test]
    fn test_extract_key_window_cut_after_address() {
        for (af, dst) in [(AddressFamily::V4, "10.0.0.5"), (AddressFamily::V6, "2001:db8::5")] {
            let g = ClassifyGeometry::for_family(af);
            let full = g.session_match(&dst.parse().unwrap());
            let cut = &full[..g.key_end()];
            assert!(cut.len() < g.window_end());
            assert_eq!(g.extract_key(cut), g.extract_key(&full));
        }
    }
}
