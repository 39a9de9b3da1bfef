use msgstream_api::{InsertRequest, MsgBase, MsgBody, MsgPack, Timestamp, TsMsg, UniqueId};

// ═══════════════════════════════════════════════════════════════
//  Workload
// ═══════════════════════════════════════════════════════════════

/// Single-row inserts with distinct ids and timestamps drawn from
/// `(after, up_to]`.
pub fn insert_batch(rng: &mut Rng, next_id: &mut UniqueId, after: Timestamp, up_to: Timestamp, count: usize) -> MsgPack {
    let span = up_to.saturating_sub(after).max(1);
    let mut pack = MsgPack::default();
    for _ in 0..count {
        let ts = after + 1 + rng.next_below(span);
        let id = *next_id;
        *next_id += 1;
        let body = MsgBody::Insert(InsertRequest {
            base: MsgBase::new(id, ts, 0),
            collection_name: "sim".into(),
            partition_name: "_default".into(),
            segment_id: 1,
            channel_id: String::new(),
            timestamps: vec![ts],
            row_ids: vec![id],
            row_data: vec![id.to_be_bytes().to_vec()],
        });
        let key = rng.next_u64() as u32;
        pack.push(TsMsg::new(body, vec![key]));
    }
    pack
}

// ═══════════════════════════════════════════════════════════════
//  RNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        } else {
            seed as u64
        };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform-ish value in `0..n`.
    pub fn next_below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}
