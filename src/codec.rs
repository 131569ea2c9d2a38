// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Deterministic byte blobs for vertices, filters and the id generator.
//! Every blob is self describing: a one-byte type tag up front, fixed
//! little-endian integers, and hex-prefix encoded path fragments.

use std::collections::HashMap;

use crate::{
    error::{ErrorKind, Result},
    filter::Filter,
    merkle::{AccountData, HashKey, Payload, Vertex, KEY_LEN, NBRANCH},
    nibbles::NibblePath,
    vid::{VertexId, VidGen},
};
use primitive_types::U256;

const TAG_BRANCH: u8 = 0;
const TAG_LEAF: u8 = 1;
const TAG_EXTENSION: u8 = 2;

const PAYLOAD_RAW: u8 = 0;
const PAYLOAD_ACCOUNT: u8 = 1;
const PAYLOAD_STORAGE: u8 = 2;

/// Hard ceiling on any length field inside a filter record.
pub const MAX_RECORD_LEN: usize = 1 << 20;

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(ErrorKind::CodecTooShort.into());
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn len(&mut self) -> Result<usize> {
        let n = self.u32()? as usize;
        if n > MAX_RECORD_LEN {
            return Err(ErrorKind::CodecOverflow.into());
        }
        Ok(n)
    }

    /// Everything not yet consumed.
    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::CodecSizeGarbled.into())
        }
    }
}

fn put_key(out: &mut Vec<u8>, key: &HashKey) {
    match key {
        HashKey::Empty => out.push(0),
        HashKey::Hash(h) => {
            out.push(KEY_LEN as u8);
            out.extend_from_slice(h);
        }
        HashKey::Rlp(blob) => {
            debug_assert!(!blob.is_empty() && blob.len() < KEY_LEN);
            out.push(blob.len() as u8);
            out.extend_from_slice(blob);
        }
    }
}

fn get_key(r: &mut Reader) -> Result<HashKey> {
    let len = r.u8()? as usize;
    match len {
        0 => Ok(HashKey::Empty),
        KEY_LEN => Ok(HashKey::Hash(r.take(KEY_LEN)?.try_into().expect("32 bytes"))),
        n if n < KEY_LEN => Ok(HashKey::Rlp(r.take(n)?.to_vec())),
        _ => Err(ErrorKind::CodecSizeGarbled.into()),
    }
}

fn put_pfx(out: &mut Vec<u8>, pfx: &NibblePath, term: bool) -> Result<()> {
    if pfx.len() > crate::nibbles::MAX_PATH_NIBBLES {
        return Err(ErrorKind::CodecOverflow.into());
    }
    let hp = pfx.encode(term);
    out.push(hp.len() as u8);
    out.extend_from_slice(&hp);
    Ok(())
}

fn get_pfx(r: &mut Reader, want_term: bool) -> Result<NibblePath> {
    let len = r.u8()? as usize;
    let (pfx, term) = NibblePath::decode(r.take(len)?)?;
    if term != want_term {
        return Err(ErrorKind::CodecSizeGarbled.into());
    }
    Ok(pfx)
}

fn put_payload(out: &mut Vec<u8>, payload: &Payload) {
    match payload {
        Payload::Raw(data) => {
            out.push(PAYLOAD_RAW);
            out.extend_from_slice(data);
        }
        Payload::Storage(data) => {
            out.push(PAYLOAD_STORAGE);
            out.extend_from_slice(data);
        }
        Payload::Account(acc) => {
            out.push(PAYLOAD_ACCOUNT);
            out.extend_from_slice(&acc.nonce.to_le_bytes());
            let mut balance = [0u8; 32];
            acc.balance.to_big_endian(&mut balance);
            out.extend_from_slice(&balance);
            match acc.storage_root {
                Some(vid) => {
                    out.push(1);
                    out.extend_from_slice(&vid.0.to_le_bytes());
                }
                None => out.push(0),
            }
            out.extend_from_slice(&acc.code_hash);
        }
    }
}

fn get_payload(r: &mut Reader) -> Result<Payload> {
    match r.u8()? {
        PAYLOAD_RAW => Ok(Payload::Raw(r.rest().to_vec())),
        PAYLOAD_STORAGE => Ok(Payload::Storage(r.rest().to_vec())),
        PAYLOAD_ACCOUNT => {
            let nonce = r.u64()?;
            let balance = U256::from_big_endian(r.take(32)?);
            let storage_root = match r.u8()? {
                0 => None,
                1 => {
                    let vid = r.u64()?;
                    if vid == 0 {
                        return Err(ErrorKind::CodecSizeGarbled.into());
                    }
                    Some(VertexId(vid))
                }
                _ => return Err(ErrorKind::CodecSizeGarbled.into()),
            };
            let code_hash = r.take(KEY_LEN)?.try_into().expect("32 bytes");
            Ok(Payload::Account(AccountData {
                nonce,
                balance,
                storage_root,
                code_hash,
            }))
        }
        _ => Err(ErrorKind::CodecWrongType.into()),
    }
}

/// Serialize a vertex into its tagged blob.
pub fn encode_vtx(vtx: &Vertex) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match vtx {
        Vertex::Branch { children } => {
            out.push(TAG_BRANCH);
            let mut bitmap: u16 = 0;
            for (n, c) in children.iter().enumerate() {
                if c.is_some() {
                    bitmap |= 1 << n;
                }
            }
            out.extend_from_slice(&bitmap.to_le_bytes());
            for vid in children.iter().flatten() {
                out.extend_from_slice(&vid.0.to_le_bytes());
            }
        }
        Vertex::Leaf { pfx, payload } => {
            out.push(TAG_LEAF);
            put_pfx(&mut out, pfx, true)?;
            put_payload(&mut out, payload);
        }
        Vertex::Extension { pfx, child } => {
            out.push(TAG_EXTENSION);
            out.extend_from_slice(&child.0.to_le_bytes());
            put_pfx(&mut out, pfx, false)?;
        }
    }
    Ok(out)
}

/// Deserialize a vertex blob.
pub fn decode_vtx(blob: &[u8]) -> Result<Vertex> {
    let mut r = Reader::new(blob);
    let vtx = match r.u8()? {
        TAG_BRANCH => {
            let bitmap = r.u16()?;
            let mut children = [None; NBRANCH];
            for (n, slot) in children.iter_mut().enumerate() {
                if bitmap & (1 << n) != 0 {
                    let vid = r.u64()?;
                    if vid == 0 {
                        return Err(ErrorKind::CodecSizeGarbled.into());
                    }
                    *slot = Some(VertexId(vid));
                }
            }
            Vertex::Branch { children }
        }
        TAG_LEAF => {
            let pfx = get_pfx(&mut r, true)?;
            let payload = get_payload(&mut r)?;
            Vertex::Leaf { pfx, payload }
        }
        TAG_EXTENSION => {
            let child = r.u64()?;
            if child == 0 {
                return Err(ErrorKind::CodecSizeGarbled.into());
            }
            let pfx = get_pfx(&mut r, false)?;
            Vertex::Extension {
                pfx,
                child: VertexId(child),
            }
        }
        _ => return Err(ErrorKind::CodecWrongType.into()),
    };
    r.finish()?;
    vtx.check().map_err(|_| ErrorKind::CodecSizeGarbled)?;
    Ok(vtx)
}

/// Serialize the id generator state.
pub fn encode_vgen(v_gen: &VidGen) -> Vec<u8> {
    let mut out = Vec::with_capacity(v_gen.as_slice().len() * 8);
    for vid in v_gen.as_slice() {
        out.extend_from_slice(&vid.0.to_le_bytes());
    }
    out
}

/// Deserialize the id generator state.
pub fn decode_vgen(blob: &[u8]) -> Result<VidGen> {
    if blob.len() % 8 != 0 {
        return Err(ErrorKind::CodecSizeGarbled.into());
    }
    let free = blob
        .chunks_exact(8)
        .map(|c| VertexId(u64::from_le_bytes(c.try_into().expect("8 bytes"))))
        .collect();
    Ok(VidGen::from_free(free))
}

fn sorted_ids<V>(map: &HashMap<VertexId, V>) -> Vec<VertexId> {
    let mut ids: Vec<_> = map.keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Serialize a filter: `src`, `trg`, generator, vertex overrides, key
/// overrides, everything id-ordered so equal filters yield equal bytes.
pub fn encode_filter(fil: &Filter) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    put_key(&mut out, &fil.src);
    put_key(&mut out, &fil.trg);

    let vgen = fil.v_gen.as_slice();
    out.extend_from_slice(&(vgen.len() as u32).to_le_bytes());
    for vid in vgen {
        out.extend_from_slice(&vid.0.to_le_bytes());
    }

    out.extend_from_slice(&(fil.s_tab.len() as u32).to_le_bytes());
    for vid in sorted_ids(&fil.s_tab) {
        out.extend_from_slice(&vid.0.to_le_bytes());
        match &fil.s_tab[&vid] {
            None => out.push(0),
            Some(vtx) => {
                let blob = encode_vtx(vtx)?;
                if blob.len() > MAX_RECORD_LEN {
                    return Err(ErrorKind::CodecOverflow.into());
                }
                out.push(1);
                out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
                out.extend_from_slice(&blob);
            }
        }
    }

    out.extend_from_slice(&(fil.k_map.len() as u32).to_le_bytes());
    for vid in sorted_ids(&fil.k_map) {
        out.extend_from_slice(&vid.0.to_le_bytes());
        put_key(&mut out, &fil.k_map[&vid]);
    }
    Ok(out)
}

/// Deserialize a filter blob.
pub fn decode_filter(blob: &[u8]) -> Result<Filter> {
    let mut r = Reader::new(blob);
    let src = get_key(&mut r)?;
    let trg = get_key(&mut r)?;

    let n = r.len()?;
    let mut free = Vec::with_capacity(n.min(MAX_RECORD_LEN));
    for _ in 0..n {
        free.push(VertexId(r.u64()?));
    }

    let n = r.len()?;
    let mut s_tab = HashMap::with_capacity(n.min(MAX_RECORD_LEN));
    for _ in 0..n {
        let vid = VertexId(r.u64()?);
        let vtx = match r.u8()? {
            0 => None,
            1 => {
                let len = r.len()?;
                Some(decode_vtx(r.take(len)?)?)
            }
            _ => return Err(ErrorKind::CodecSizeGarbled.into()),
        };
        s_tab.insert(vid, vtx);
    }

    let n = r.len()?;
    let mut k_map = HashMap::with_capacity(n.min(MAX_RECORD_LEN));
    for _ in 0..n {
        let vid = VertexId(r.u64()?);
        k_map.insert(vid, get_key(&mut r)?);
    }

    r.finish()?;
    Ok(Filter {
        src,
        trg,
        s_tab,
        k_map,
        v_gen: VidGen::from_free(free),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn leaf(pfx: Vec<u8>, data: Vec<u8>) -> Vertex {
        Vertex::Leaf {
            pfx: NibblePath::new(pfx),
            payload: Payload::Raw(data),
        }
    }

    #[test_case(leaf(vec![1, 2, 3], vec![0xc0]); "leaf raw")]
    #[test_case(leaf(vec![], vec![]); "leaf empty path and data")]
    #[test_case(Vertex::Leaf {
        pfx: NibblePath::new(vec![0xf]),
        payload: Payload::Storage(vec![0xde, 0xad]),
    }; "leaf storage")]
    #[test_case(Vertex::Leaf {
        pfx: NibblePath::new(vec![0, 1]),
        payload: Payload::Account(AccountData {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: Some(VertexId(42)),
            ..Default::default()
        }),
    }; "leaf account")]
    #[test_case(Vertex::Leaf {
        pfx: NibblePath::new(vec![2]),
        payload: Payload::Account(AccountData::default()),
    }; "leaf blank account")]
    #[test_case(Vertex::Extension {
        pfx: NibblePath::new(vec![4, 5, 6]),
        child: VertexId(9),
    }; "extension")]
    #[test_case(Vertex::new_branch(&[(0, VertexId(2)), (7, VertexId(3)), (15, VertexId(4))]); "branch")]
    fn vertex_round_trip(vtx: Vertex) {
        let blob = encode_vtx(&vtx).unwrap();
        assert_eq!(decode_vtx(&blob).unwrap(), vtx);
    }

    #[test]
    fn vertex_decode_failures() {
        assert_eq!(decode_vtx(&[]).unwrap_err().kind, ErrorKind::CodecTooShort);
        assert_eq!(decode_vtx(&[9]).unwrap_err().kind, ErrorKind::CodecWrongType);

        let blob = encode_vtx(&Vertex::new_branch(&[
            (0, VertexId(2)),
            (1, VertexId(3)),
        ]))
        .unwrap();
        // every truncation errors instead of panicking
        for cut in 0..blob.len() {
            assert!(decode_vtx(&blob[..cut]).is_err());
        }

        let mut trailing = blob;
        trailing.push(0);
        assert_eq!(
            decode_vtx(&trailing).unwrap_err().kind,
            ErrorKind::CodecSizeGarbled
        );
    }

    #[test]
    fn vgen_round_trip() {
        let vgen = VidGen::from_free(vec![VertexId(3), VertexId(8), VertexId(11)]);
        assert_eq!(decode_vgen(&encode_vgen(&vgen)).unwrap(), vgen);
        assert_eq!(
            decode_vgen(&[0; 7]).unwrap_err().kind,
            ErrorKind::CodecSizeGarbled
        );
    }

    #[test]
    fn filter_round_trip_and_determinism() {
        let fil = Filter {
            src: HashKey::Hash([3; 32]),
            trg: HashKey::Rlp(vec![0xc1, 0x80]),
            s_tab: [
                (VertexId(2), Some(leaf(vec![1], vec![2]))),
                (VertexId(5), None),
                (VertexId(3), Some(Vertex::new_branch(&[(0, VertexId(2)), (1, VertexId(5))]))),
            ]
            .into(),
            k_map: [
                (VertexId(2), HashKey::Hash([0xee; 32])),
                (VertexId(5), HashKey::Empty),
            ]
            .into(),
            v_gen: VidGen::from_free(vec![VertexId(6)]),
        };
        let blob = encode_filter(&fil).unwrap();
        assert_eq!(decode_filter(&blob).unwrap(), fil);
        // id-ordered records make the encoding a fingerprint
        assert_eq!(encode_filter(&fil).unwrap(), blob);
        for cut in 0..blob.len() {
            assert!(decode_filter(&blob[..cut]).is_err());
        }
    }
}
