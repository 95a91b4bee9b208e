// Hand-assembled VCDIFF streams for integration tests.
#![allow(dead_code)]

use xz2::stream::{Action, Check, Status, Stream};

pub const MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

pub const VCD_SOURCE: u8 = 0x01;
pub const VCD_TARGET: u8 = 0x02;
pub const VCD_ADLER32: u8 = 0x04;

pub const VCD_DATACOMP: u8 = 0x01;
pub const VCD_INSTCOMP: u8 = 0x02;
pub const VCD_ADDRCOMP: u8 = 0x04;

/// Opcode of a single COPY with a table size of 4 in `mode`.
pub const fn copy4(mode: u8) -> u8 {
    19 + 16 * mode + 1
}

pub fn push_varint(out: &mut Vec<u8>, mut v: u64) {
    let mut groups = vec![(v & 0x7F) as u8];
    v >>= 7;
    while v > 0 {
        groups.push((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

pub fn varint(v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    push_varint(&mut out, v);
    out
}

/// One window of a hand-built delta.
#[derive(Clone, Debug, Default)]
pub struct Window {
    pub source: Option<(u64, u64)>,
    pub target_len: u64,
    pub del_ind: u8,
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
    pub adler32: Option<u32>,
    pub enc_len: Option<u64>,
}

impl Window {
    pub fn new(target_len: u64) -> Self {
        Self {
            target_len,
            ..Self::default()
        }
    }

    pub fn source(mut self, len: u64, pos: u64) -> Self {
        self.source = Some((len, pos));
        self
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn inst(mut self, inst: &[u8]) -> Self {
        self.inst = inst.to_vec();
        self
    }

    pub fn addr(mut self, addr: &[u8]) -> Self {
        self.addr = addr.to_vec();
        self
    }

    pub fn del_ind(mut self, del_ind: u8) -> Self {
        self.del_ind = del_ind;
        self
    }

    pub fn adler32(mut self, sum: u32) -> Self {
        self.adler32 = Some(sum);
        self
    }

    /// Store a wrong delta encoding length.
    pub fn enc_len(mut self, enc_len: u64) -> Self {
        self.enc_len = Some(enc_len);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        push_varint(&mut body, self.target_len);
        body.push(self.del_ind);
        push_varint(&mut body, self.data.len() as u64);
        push_varint(&mut body, self.inst.len() as u64);
        push_varint(&mut body, self.addr.len() as u64);
        if let Some(sum) = self.adler32 {
            body.extend_from_slice(&sum.to_be_bytes());
        }
        body.extend_from_slice(&self.data);
        body.extend_from_slice(&self.inst);
        body.extend_from_slice(&self.addr);

        let mut win_ind = 0;
        if self.source.is_some() {
            win_ind |= VCD_SOURCE;
        }
        if self.adler32.is_some() {
            win_ind |= VCD_ADLER32;
        }

        let mut out = vec![win_ind];
        if let Some((len, pos)) = self.source {
            push_varint(&mut out, len);
            push_varint(&mut out, pos);
        }
        push_varint(&mut out, self.enc_len.unwrap_or(body.len() as u64));
        out.extend_from_slice(&body);
        out
    }
}

/// Builder for a complete delta file.
#[derive(Clone, Debug, Default)]
pub struct DeltaBuilder {
    secondary: Option<u8>,
    app_header: Option<Vec<u8>>,
    windows: Vec<Window>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secondary(mut self, id: u8) -> Self {
        self.secondary = Some(id);
        self
    }

    pub fn app_header(mut self, app: &[u8]) -> Self {
        self.app_header = Some(app.to_vec());
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.windows.push(window);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        let mut hdr_ind = 0u8;
        if self.secondary.is_some() {
            hdr_ind |= 0x01;
        }
        if self.app_header.is_some() {
            hdr_ind |= 0x04;
        }
        out.push(hdr_ind);
        if let Some(id) = self.secondary {
            out.push(id);
        }
        if let Some(app) = &self.app_header {
            push_varint(&mut out, app.len() as u64);
            out.extend_from_slice(app);
        }
        for w in &self.windows {
            out.extend(w.encode());
        }
        out
    }
}

/// Compress `parts` as consecutive sync-flushed slices of one xz stream,
/// framing each as an LZMA secondary chunk that declares `declared(part)`
/// bytes.
pub fn xz_chunks(parts: &[&[u8]], declared: impl Fn(&[u8]) -> u64) -> Vec<Vec<u8>> {
    let mut enc = Stream::new_easy_encoder(6, Check::None).unwrap();
    parts
        .iter()
        .map(|part| {
            let mut payload = Vec::with_capacity(part.len() + 256);
            let mut rest: &[u8] = part;
            loop {
                if payload.len() == payload.capacity() {
                    payload.reserve(4096);
                }
                let before = enc.total_in();
                let status = enc
                    .process_vec(rest, &mut payload, Action::SyncFlush)
                    .unwrap();
                rest = &rest[(enc.total_in() - before) as usize..];
                if matches!(status, Status::StreamEnd) {
                    break;
                }
            }
            let mut chunk = varint(declared(part));
            chunk.extend_from_slice(&payload);
            chunk
        })
        .collect()
}

/// Deterministic pseudo-random bytes.
pub fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

/// Flip one byte every `stride` bytes.
pub fn mutate(base: &[u8], stride: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for i in (0..out.len()).step_by(stride.max(1)) {
        out[i] = out[i].wrapping_add(1);
    }
    out
}
