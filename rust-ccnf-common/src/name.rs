//! Hierarchical content names.
//!
//! A `Name` is an ordered sequence of typed segments built around its TLV
//! representation. The common operation during forwarding is taking prefixes
//! (`slice`) and hashing them for table probes, so a name keeps one shared
//! segment store plus a shared array of cumulative prefix hashes: slicing is
//! a reference-count bump, and a hash computed through any slice is visible
//! to every other slice of the same name.

use crate::error::Error;
use crate::tlv::TlvCursor;
use bytes::{BufMut, Bytes, BytesMut};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Generic name segment.
pub const SEG_NAME: u16 = 0x0001;
/// Opaque binary segment.
pub const SEG_BINARY: u16 = 0x0002;
/// Payload identifier segment.
pub const SEG_PAYLOAD_ID: u16 = 0x0011;
/// First application-reserved segment type.
pub const SEG_APP_MIN: u16 = 0xF000;
/// Last application-reserved segment type.
pub const SEG_APP_MAX: u16 = 0xF0FF;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// One typed segment of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    typ: u16,
    value: Bytes,
}

impl Segment {
    pub fn new(typ: u16, value: impl Into<Bytes>) -> Self {
        Self {
            typ,
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<Bytes>) -> Self {
        Self::new(SEG_NAME, value)
    }

    pub fn typ(&self) -> u16 {
        self.typ
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// True for the segment types the forwarder accepts on the wire.
    pub fn is_valid_type(typ: u16) -> bool {
        matches!(typ, SEG_NAME | SEG_BINARY | SEG_PAYLOAD_ID)
            || (SEG_APP_MIN..=SEG_APP_MAX).contains(&typ)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.typ == SEG_NAME
            && self.value.iter().all(|&b| b.is_ascii_graphic() || b == b' ');
        if printable {
            write!(f, "{}", String::from_utf8_lossy(&self.value))
        } else {
            write!(f, "0x{:04x}=", self.typ)?;
            for &b in &self.value {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

#[derive(Debug)]
struct NameInner {
    segments: Vec<Segment>,
    // Cumulative prefix hashes, extended on demand. Shared by every slice of
    // this name, so no prefix hash is ever computed twice.
    hashes: RefCell<Vec<u32>>,
}

/// An immutable hierarchical name. The empty name is the default route.
#[derive(Debug, Clone)]
pub struct Name {
    inner: Rc<NameInner>,
    len: usize,
}

impl Name {
    /// The default route: a name with no segments.
    pub fn root() -> Self {
        Self::from_segments(Vec::new())
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let len = segments.len();
        Self {
            inner: Rc::new(NameInner {
                segments,
                hashes: RefCell::new(Vec::new()),
            }),
            len,
        }
    }

    /// Parses the payload of a Name TLV: a flat sequence of segment TLVs.
    pub fn from_wire(buf: Bytes) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut cursor = TlvCursor::new(buf);
        while let Some((typ, value)) = cursor
            .next()
            .map_err(|e| Error::MalformedName(e.to_string()))?
        {
            if !Segment::is_valid_type(typ) {
                return Err(Error::MalformedName(format!(
                    "reserved segment type 0x{:04x}",
                    typ
                )));
            }
            segments.push(Segment::new(typ, value));
        }
        Ok(Self::from_segments(segments))
    }

    /// Parses a `ccnx:/a/b` or `/a/b` URI. Every path element becomes a
    /// generic NAME segment; empty elements are skipped, so `/` and the empty
    /// string both give the default route.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        let path = uri.strip_prefix("ccnx:").unwrap_or(uri);
        if !path.is_empty() && !path.starts_with('/') {
            return Err(Error::MalformedName(format!(
                "name URI must start with '/': {uri}"
            )));
        }
        let segments = path
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| Segment::name(part.as_bytes().to_vec()))
            .collect();
        Ok(Self::from_segments(segments))
    }

    pub fn segment_count(&self) -> usize {
        self.len
    }

    pub fn is_root(&self) -> bool {
        self.len == 0
    }

    /// Panics when `i` is out of range; index validity is the caller's
    /// invariant, not a runtime condition.
    pub fn segment(&self, i: usize) -> &Segment {
        assert!(i < self.len, "segment index {} out of range {}", i, self.len);
        &self.inner.segments[i]
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.inner.segments[..self.len].iter()
    }

    /// Returns the name consisting of the first `k` segments. Shares segment
    /// storage and the cumulative-hash array with `self`.
    pub fn slice(&self, k: usize) -> Self {
        assert!(k <= self.len, "slice length {} out of range {}", k, self.len);
        Self {
            inner: Rc::clone(&self.inner),
            len: k,
        }
    }

    /// Returns a new name with `segment` appended. Allocates fresh storage;
    /// the source name and its hashes are untouched.
    pub fn append(&self, segment: Segment) -> Self {
        let mut segments: Vec<Segment> = self.inner.segments[..self.len].to_vec();
        segments.push(segment);
        Self::from_segments(segments)
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        if self.len < prefix.len {
            return false;
        }
        self.inner.segments[..prefix.len]
            .iter()
            .zip(prefix.segments())
            .all(|(a, b)| a == b)
    }

    /// Hash of the first `k` segments; zero for `k == 0`. Memoized in the
    /// shared array, and chained so two names agreeing on their first `k`
    /// segments agree on `cumulative_hash(k)`.
    pub fn cumulative_hash(&self, k: usize) -> u32 {
        assert!(k <= self.len, "hash length {} out of range {}", k, self.len);
        if k == 0 {
            return 0;
        }
        let mut hashes = self.inner.hashes.borrow_mut();
        while hashes.len() < k {
            let i = hashes.len();
            let seed = if i == 0 { 0 } else { hashes[i - 1] };
            hashes.push(hash_segment(seed, &self.inner.segments[i]));
        }
        hashes[k - 1]
    }

    /// Encodes the segments as the payload of a Name TLV.
    pub fn encode(&self, buf: &mut BytesMut) {
        for seg in self.segments() {
            buf.put_u16(seg.typ);
            buf.put_u16(seg.value.len() as u16);
            buf.put_slice(&seg.value);
        }
    }

    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// One FNV-1a step over a segment, chained on the previous cumulative hash.
fn hash_segment(seed: u32, seg: &Segment) -> u32 {
    let mut h = FNV_OFFSET ^ seed;
    for b in seg.typ.to_be_bytes() {
        h ^= u32::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    for &b in seg.value.iter() {
        h ^= u32::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && (Rc::ptr_eq(&self.inner, &other.inner)
                || self.segments().zip(other.segments()).all(|(a, b)| a == b))
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    /// Canonical shortlex: shorter names sort first, equal-length names by
    /// first differing segment (type, then bytes).
    fn cmp(&self, other: &Self) -> Ordering {
        self.len.cmp(&other.len).then_with(|| {
            for (a, b) in self.segments().zip(other.segments()) {
                let ord = a.typ.cmp(&b.typ).then_with(|| a.value.cmp(&b.value));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.len);
        state.write_u32(self.cumulative_hash(self.len));
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return write!(f, "/");
        }
        for seg in self.segments() {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}
