use std::collections::HashMap;

use msgstream_api::{
    DeleteRequest, InsertRequest, MSG_TYPE_PROPERTY, MqError, MsgCodec, MsgPayload, MsgType, Properties,
    QueryNodeStats, SearchRequest, SearchResults, TimeTickRequest, TsMsg,
};

type UnmarshalFn = fn(&[u8]) -> Result<TsMsg, MqError>;

// ═══════════════════════════════════════════════════════════════
//  UnmarshalDispatcher: MsgType → constructor
// ═══════════════════════════════════════════════════════════════

/// Codec keyed by the `msg_type` property.
///
/// `marshal` stamps the tag; `unmarshal` looks the tag up and runs the
/// constructor registered for it. `Default` registers every message type.
pub struct UnmarshalDispatcher {
    table: HashMap<MsgType, UnmarshalFn>,
}

impl UnmarshalDispatcher {
    /// Dispatcher with nothing registered.
    pub fn empty() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn register<P: MsgPayload>(&mut self) {
        self.table.insert(P::MSG_TYPE, TsMsg::unmarshal::<P>);
    }

    pub fn is_registered(&self, msg_type: MsgType) -> bool {
        self.table.contains_key(&msg_type)
    }
}

impl Default for UnmarshalDispatcher {
    fn default() -> Self {
        let mut d = Self::empty();
        d.register::<InsertRequest>();
        d.register::<DeleteRequest>();
        d.register::<SearchRequest>();
        d.register::<SearchResults>();
        d.register::<TimeTickRequest>();
        d.register::<QueryNodeStats>();
        d
    }
}

impl MsgCodec for UnmarshalDispatcher {
    fn marshal(&self, msg: &TsMsg) -> Result<(Vec<u8>, Properties), MqError> {
        let payload = msg.marshal()?;
        let mut properties = Properties::new();
        properties.insert(MSG_TYPE_PROPERTY.to_string(), msg.msg_type().as_str().to_string());
        Ok((payload, properties))
    }

    fn unmarshal(&self, payload: &[u8], properties: &Properties) -> Result<TsMsg, MqError> {
        let tag = properties
            .get(MSG_TYPE_PROPERTY)
            .ok_or_else(|| MqError::format_err(format!("missing '{MSG_TYPE_PROPERTY}' property")))?;
        let msg_type: MsgType = tag.parse()?;
        let ctor = self
            .table
            .get(&msg_type)
            .ok_or_else(|| MqError::format_err(format!("no unmarshaler registered for {msg_type}")))?;
        ctor(payload)
    }
}

#[cfg(test)]
mod tests {
    use msgstream_api::{ErrorKind, MsgBase, MsgBody};

    use super::*;

    fn delete_msg() -> TsMsg {
        let body = MsgBody::Delete(DeleteRequest {
            base: MsgBase::new(3, 11, 3),
            collection_name: "Collection".into(),
            channel_id: "1".into(),
            timestamps: vec![11],
            primary_keys: vec![1],
        });
        TsMsg::new(body, vec![3])
    }

    #[test]
    fn round_trip_through_properties() {
        let codec = UnmarshalDispatcher::default();
        let msg = delete_msg();

        let (payload, props) = codec.marshal(&msg).unwrap();
        assert_eq!(props.get(MSG_TYPE_PROPERTY).map(String::as_str), Some("Delete"));

        let back = codec.unmarshal(&payload, &props).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn every_type_is_registered_by_default() {
        let codec = UnmarshalDispatcher::default();
        for t in MsgType::ALL {
            assert!(codec.is_registered(t), "{t} not registered");
        }
    }

    #[test]
    fn missing_tag_is_format_error() {
        let codec = UnmarshalDispatcher::default();
        let (payload, _) = codec.marshal(&delete_msg()).unwrap();

        let err = codec.unmarshal(&payload, &Properties::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn unknown_tag_is_format_error() {
        let codec = UnmarshalDispatcher::default();
        let mut props = Properties::new();
        props.insert(MSG_TYPE_PROPERTY.into(), "Flush".into());

        let err = codec.unmarshal(b"{}", &props).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn unregistered_tag_is_format_error() {
        let mut codec = UnmarshalDispatcher::empty();
        codec.register::<InsertRequest>();
        let (payload, props) = codec.marshal(&delete_msg()).unwrap();

        let err = codec.unmarshal(&payload, &props).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("Delete"));
    }

    #[test]
    fn malformed_payload_is_format_error() {
        let codec = UnmarshalDispatcher::default();
        let mut props = Properties::new();
        props.insert(MSG_TYPE_PROPERTY.into(), "Insert".into());

        let err = codec.unmarshal(b"\x00garbage", &props).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
