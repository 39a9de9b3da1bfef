use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use msgstream_api::{DeleteRequest, InsertRequest, MsgBase, MsgBody, MsgPack, TsMsg};

use crate::StreamError;

/// Routing policy for `produce`.
///
/// Receives the outgoing messages and, per message, its hash keys already
/// reduced modulo the channel count. Returns the partial pack to send on
/// each destination channel index.
pub type RepackFunc =
    Arc<dyn Fn(&[TsMsg], &[Vec<u32>]) -> Result<BTreeMap<u32, MsgPack>, StreamError> + Send + Sync>;

/// Reduce every message's hash keys into `0..channels`.
pub(crate) fn bucket_keys(msgs: &[TsMsg], channels: usize) -> Vec<Vec<u32>> {
    let n = channels as u64;
    msgs.iter()
        .map(|m| m.hash_keys().iter().map(|&k| (k as u64 % n) as u32).collect())
        .collect()
}

/// One delivery per distinct destination channel of each message.
pub fn default_repack(msgs: &[TsMsg], keys: &[Vec<u32>]) -> Result<BTreeMap<u32, MsgPack>, StreamError> {
    let mut result: BTreeMap<u32, MsgPack> = BTreeMap::new();
    for (msg, channels) in msgs.iter().zip(keys) {
        if channels.is_empty() {
            return Err(StreamError::config(format!(
                "{} message {} has no hash keys",
                msg.msg_type(),
                msg.id()
            )));
        }
        let distinct: BTreeSet<u32> = channels.iter().copied().collect();
        for channel in distinct {
            result.entry(channel).or_default().push(msg.clone());
        }
    }
    Ok(result)
}

// ═══════════════════════════════════════════════════════════════
//  Row-splitting policies
// ═══════════════════════════════════════════════════════════════

/// Split multi-row inserts so each row lands on the channel of its own key.
pub fn insert_repack(msgs: &[TsMsg], keys: &[Vec<u32>]) -> Result<BTreeMap<u32, MsgPack>, StreamError> {
    let mut result: BTreeMap<u32, MsgPack> = BTreeMap::new();
    for (msg, channels) in msgs.iter().zip(keys) {
        let MsgBody::Insert(req) = &msg.body else {
            return Err(StreamError::config(format!("insert repack got a {} message", msg.msg_type())));
        };
        let rows = req.num_rows();
        if channels.len() != rows || req.timestamps.len() != rows || req.row_data.len() != rows {
            return Err(StreamError::config(format!(
                "insert {}: {} hash keys, {} timestamps, {} row blobs for {} rows",
                msg.id(),
                channels.len(),
                req.timestamps.len(),
                req.row_data.len(),
                rows
            )));
        }

        for (row, &channel) in channels.iter().enumerate() {
            let ts = req.timestamps[row];
            let slice = InsertRequest {
                base: MsgBase::new(req.base.msg_id, ts, req.base.source_id),
                collection_name: req.collection_name.clone(),
                partition_name: req.partition_name.clone(),
                segment_id: req.segment_id,
                channel_id: req.channel_id.clone(),
                timestamps: vec![ts],
                row_ids: vec![req.row_ids[row]],
                row_data: vec![req.row_data[row].clone()],
            };
            let key = msg.hash_values.get(row).copied().unwrap_or(channel);
            let split = TsMsg::with_range(MsgBody::Insert(slice), vec![key], ts, ts);
            result.entry(channel).or_default().push(split);
        }
    }
    Ok(result)
}

/// Split multi-key deletes so each primary key lands on the channel of its
/// own hash key.
pub fn delete_repack(msgs: &[TsMsg], keys: &[Vec<u32>]) -> Result<BTreeMap<u32, MsgPack>, StreamError> {
    let mut result: BTreeMap<u32, MsgPack> = BTreeMap::new();
    for (msg, channels) in msgs.iter().zip(keys) {
        let MsgBody::Delete(req) = &msg.body else {
            return Err(StreamError::config(format!("delete repack got a {} message", msg.msg_type())));
        };
        let rows = req.primary_keys.len();
        if channels.len() != rows || req.timestamps.len() != rows {
            return Err(StreamError::config(format!(
                "delete {}: {} hash keys, {} timestamps for {} primary keys",
                msg.id(),
                channels.len(),
                req.timestamps.len(),
                rows
            )));
        }

        for (row, &channel) in channels.iter().enumerate() {
            let ts = req.timestamps[row];
            let slice = DeleteRequest {
                base: MsgBase::new(req.base.msg_id, ts, req.base.source_id),
                collection_name: req.collection_name.clone(),
                channel_id: req.channel_id.clone(),
                timestamps: vec![ts],
                primary_keys: vec![req.primary_keys[row]],
            };
            let key = msg.hash_values.get(row).copied().unwrap_or(channel);
            let split = TsMsg::with_range(MsgBody::Delete(slice), vec![key], ts, ts);
            result.entry(channel).or_default().push(split);
        }
    }
    Ok(result)
}
