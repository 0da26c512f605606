//! Fixed, little-endian wire types for the sweep exchange paths.
//!
//! Integer fields are stored pre-LE with `.to_le()` and decoded with
//! `::from_le()`. Angular-flux payloads travel as flat `f64` arrays cast
//! with bytemuck; both ends address them through the same precomputed
//! layout, so no per-element framing is needed.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// Count header for record streams.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Fixed header of a compact cross-partition face record. The variable
/// vertex-id tail follows as `nverts` little-endian u64 values.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireFaceHdr {
    pub cell_gid_le: u64,
    pub neighbor_gid_le: u64,
    pub face_id_le: u32,
    pub slot_le: u32,
    pub nverts_le: u32,
    pub _pad: u32, // keep 8-byte alignment (explicit)
}

impl WireFaceHdr {
    pub const SIZE: usize = 32;
}

/// Compact record describing one face crossing a partition boundary:
/// which upwind cell/face produced it, which downwind cell consumes it,
/// the sender-side slot, and the face's vertex ids in sender dof order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceRecord {
    pub cell_gid: u64,
    pub face_id: u32,
    pub neighbor_gid: u64,
    pub slot: u32,
    pub vertex_ids: Vec<u64>,
}

/// Serialize a record list as `[WireCount, (WireFaceHdr, verts...)*]`.
pub fn encode_face_records(records: &[FaceRecord]) -> Vec<u8> {
    let tail: usize = records
        .iter()
        .map(|r| WireFaceHdr::SIZE + r.vertex_ids.len() * 8)
        .sum();
    let mut out = Vec::with_capacity(size_of::<WireCount>() + tail);
    out.extend_from_slice(cast_slice(std::slice::from_ref(&WireCount::new(
        records.len(),
    ))));
    for r in records {
        let hdr = WireFaceHdr {
            cell_gid_le: r.cell_gid.to_le(),
            neighbor_gid_le: r.neighbor_gid.to_le(),
            face_id_le: r.face_id.to_le(),
            slot_le: r.slot.to_le(),
            nverts_le: (r.vertex_ids.len() as u32).to_le(),
            _pad: 0,
        };
        out.extend_from_slice(cast_slice(std::slice::from_ref(&hdr)));
        for &v in &r.vertex_ids {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Inverse of [`encode_face_records`]. Returns a description of the first
/// framing violation instead of a truncated list.
pub fn decode_face_records(bytes: &[u8]) -> Result<Vec<FaceRecord>, String> {
    let cnt_sz = size_of::<WireCount>();
    if bytes.len() < cnt_sz {
        return Err(format!("record stream too short: {} bytes", bytes.len()));
    }
    let count: WireCount = bytemuck::pod_read_unaligned(&bytes[..cnt_sz]);
    let mut records = Vec::with_capacity(count.get());
    let mut off = cnt_sz;
    for i in 0..count.get() {
        if bytes.len() < off + WireFaceHdr::SIZE {
            return Err(format!("record {i}: header truncated at byte {off}"));
        }
        let hdr: WireFaceHdr =
            bytemuck::pod_read_unaligned(&bytes[off..off + WireFaceHdr::SIZE]);
        off += WireFaceHdr::SIZE;
        let nverts = u32::from_le(hdr.nverts_le) as usize;
        if bytes.len() < off + nverts * 8 {
            return Err(format!("record {i}: vertex tail truncated at byte {off}"));
        }
        let mut vertex_ids = Vec::with_capacity(nverts);
        for k in 0..nverts {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[off + k * 8..off + k * 8 + 8]);
            vertex_ids.push(u64::from_le_bytes(raw));
        }
        off += nverts * 8;
        records.push(FaceRecord {
            cell_gid: u64::from_le(hdr.cell_gid_le),
            neighbor_gid: u64::from_le(hdr.neighbor_gid_le),
            face_id: u32::from_le(hdr.face_id_le),
            slot: u32::from_le(hdr.slot_le),
            vertex_ids,
        });
    }
    if off != bytes.len() {
        return Err(format!("{} trailing bytes after last record", bytes.len() - off));
    }
    Ok(records)
}

/// Header of a self-describing CBC flux message. Followed by `nverts`
/// little-endian u64 vertex ids, then the `f64` payload.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCbcHdr {
    pub cell_gid_le: u64,
    pub face_id_le: u32,
    pub nverts_le: u32,
}

impl WireCbcHdr {
    pub const SIZE: usize = 16;
}

/// Encode one CBC message: upwind cell gid, upwind face id, the face's
/// vertex ids in sender dof order, and the flux payload.
pub fn encode_cbc_message(
    cell_gid: u64,
    face_id: u32,
    vertex_ids: &[u64],
    payload: &[f64],
) -> Vec<u8> {
    let hdr = WireCbcHdr {
        cell_gid_le: cell_gid.to_le(),
        face_id_le: face_id.to_le(),
        nverts_le: (vertex_ids.len() as u32).to_le(),
    };
    let mut out =
        Vec::with_capacity(WireCbcHdr::SIZE + vertex_ids.len() * 8 + payload.len() * 8);
    out.extend_from_slice(cast_slice(std::slice::from_ref(&hdr)));
    for &v in vertex_ids {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for &p in payload {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

/// Decoded CBC message.
#[derive(Debug, Clone, PartialEq)]
pub struct CbcMessage {
    pub cell_gid: u64,
    pub face_id: u32,
    pub vertex_ids: Vec<u64>,
    pub payload: Vec<f64>,
}

/// Inverse of [`encode_cbc_message`].
pub fn decode_cbc_message(bytes: &[u8]) -> Result<CbcMessage, String> {
    if bytes.len() < WireCbcHdr::SIZE {
        return Err(format!("message too short: {} bytes", bytes.len()));
    }
    let hdr: WireCbcHdr = bytemuck::pod_read_unaligned(&bytes[..WireCbcHdr::SIZE]);
    let nverts = u32::from_le(hdr.nverts_le) as usize;
    let verts_end = WireCbcHdr::SIZE + nverts * 8;
    if bytes.len() < verts_end {
        return Err(format!("vertex tail truncated: {} bytes", bytes.len()));
    }
    let mut vertex_ids = Vec::with_capacity(nverts);
    for k in 0..nverts {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[WireCbcHdr::SIZE + k * 8..WireCbcHdr::SIZE + k * 8 + 8]);
        vertex_ids.push(u64::from_le_bytes(raw));
    }
    let tail = &bytes[verts_end..];
    if tail.len() % 8 != 0 {
        return Err(format!("payload not f64-aligned: {} bytes", tail.len()));
    }
    let mut payload = Vec::with_capacity(tail.len() / 8);
    for chunk in tail.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        payload.push(f64::from_le_bytes(raw));
    }
    Ok(CbcMessage {
        cell_gid: u64::from_le(hdr.cell_gid_le),
        face_id: u32::from_le(hdr.face_id_le),
        vertex_ids,
        payload,
    })
}

// ===== Compile-time sanity checks =========================================

use static_assertions::const_assert_eq;

const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireFaceHdr>(), WireFaceHdr::SIZE);
const_assert_eq!(align_of::<WireFaceHdr>(), 8);
const_assert_eq!(size_of::<WireCbcHdr>(), WireCbcHdr::SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_record_roundtrip() {
        let records = vec![
            FaceRecord {
                cell_gid: 7,
                face_id: 2,
                neighbor_gid: 12,
                slot: 0,
                vertex_ids: vec![100, 101, 102, 103],
            },
            FaceRecord {
                cell_gid: 8,
                face_id: 0,
                neighbor_gid: 12,
                slot: 1,
                vertex_ids: vec![104, 105],
            },
        ];
        let bytes = encode_face_records(&records);
        assert_eq!(decode_face_records(&bytes).unwrap(), records);
    }

    #[test]
    fn empty_record_stream() {
        let bytes = encode_face_records(&[]);
        assert_eq!(decode_face_records(&bytes).unwrap(), Vec::new());
    }

    #[test]
    fn truncated_record_stream_is_rejected() {
        let records = vec![FaceRecord {
            cell_gid: 1,
            face_id: 0,
            neighbor_gid: 2,
            slot: 0,
            vertex_ids: vec![10, 11],
        }];
        let bytes = encode_face_records(&records);
        assert!(decode_face_records(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn cbc_message_roundtrip() {
        let bytes = encode_cbc_message(42, 3, &[7, 8, 9], &[1.5, -2.25, 0.0]);
        let msg = decode_cbc_message(&bytes).unwrap();
        assert_eq!(msg.cell_gid, 42);
        assert_eq!(msg.face_id, 3);
        assert_eq!(msg.vertex_ids, vec![7, 8, 9]);
        assert_eq!(msg.payload, vec![1.5, -2.25, 0.0]);
    }

    #[test]
    fn wire_count_roundtrip() {
        let c = WireCount::new(12345);
        assert_eq!(c.get(), 12345);
    }
}
