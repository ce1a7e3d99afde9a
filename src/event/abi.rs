//! Contract ABI handling for the watched event.
//!
//! Only the parts needed to recognise and decode one event type: the
//! canonical signature, its Keccak-256 topic, and the static/dynamic
//! parameter layout of the log. Arrays and tuples are rejected up front.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha3::{Digest, Keccak256};

use super::{Event, Position};
use crate::error::{BridgeError, BridgeResult};

/// Events emitted by the door contract. Used when no schema is configured.
pub const DOOR_CONTRACT_ABI: &str = r#"[
  {"anonymous":false,"inputs":[],"name":"newAccess","type":"event"},
  {"anonymous":false,"inputs":[],"name":"newReset","type":"event"},
  {"anonymous":false,"inputs":[
    {"indexed":false,"internalType":"address","name":"guest","type":"address"},
    {"indexed":false,"internalType":"string","name":"method","type":"string"}
  ],"name":"updateGuest","type":"event"},
  {"anonymous":false,"inputs":[
    {"indexed":false,"internalType":"string","name":"method","type":"string"}
  ],"name":"updateOwner","type":"event"}
]"#;

const WORD: usize = 32;

#[derive(Debug, Clone, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<AbiParam>,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    Address,
    Bool,
    Uint,
    Int,
    FixedBytes(usize),
    Bytes,
    String,
}

impl ParamType {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "address" => Some(Self::Address),
            "bool" => Some(Self::Bool),
            "string" => Some(Self::String),
            "bytes" => Some(Self::Bytes),
            k if k.starts_with("uint") => bits(&k[4..]).map(|_| Self::Uint),
            k if k.starts_with("int") => bits(&k[3..]).map(|_| Self::Int),
            k if k.starts_with("bytes") => match k[5..].parse::<usize>() {
                Ok(n) if (1..=32).contains(&n) => Some(Self::FixedBytes(n)),
                _ => None,
            },
            _ => None,
        }
    }

    fn is_dynamic(self) -> bool {
        matches!(self, Self::Bytes | Self::String)
    }
}

fn bits(suffix: &str) -> Option<u16> {
    if suffix.is_empty() {
        return Some(256);
    }
    match suffix.parse::<u16>() {
        Ok(n) if n > 0 && n <= 256 && n % 8 == 0 => Some(n),
        _ => None,
    }
}

/// `uint` and `int` are aliases for their 256-bit forms in signatures.
fn canonical_type(kind: &str) -> String {
    match kind {
        "uint" => "uint256".into(),
        "int" => "int256".into(),
        other => other.into(),
    }
}

/// Recognises and decodes one named event of a contract ABI.
#[derive(Debug, Clone)]
pub struct EventSchema {
    name: String,
    params: Vec<(AbiParam, ParamType)>,
    signature: String,
    topic: [u8; 32],
}

impl EventSchema {
    pub fn from_abi_str(abi: &str, event_name: &str) -> BridgeResult<Self> {
        let value: Value = serde_json::from_str(abi)
            .map_err(|e| BridgeError::config(format!("event schema is not valid JSON: {e}")))?;
        Self::from_abi(&value, event_name)
    }

    pub fn from_abi(abi: &Value, event_name: &str) -> BridgeResult<Self> {
        let entries: Vec<AbiEntry> = serde_json::from_value(abi.clone())
            .map_err(|e| BridgeError::config(format!("event schema is not an ABI array: {e}")))?;

        let entry = entries
            .into_iter()
            .find(|e| e.kind == "event" && e.name.as_deref() == Some(event_name))
            .ok_or_else(|| BridgeError::config(format!("event '{event_name}' not found in schema")))?;

        if entry.anonymous {
            return Err(BridgeError::config(format!(
                "event '{event_name}' is anonymous and cannot be filtered by topic"
            )));
        }

        let mut params = Vec::with_capacity(entry.inputs.len());
        for param in entry.inputs {
            let ty = ParamType::parse(&param.kind).ok_or_else(|| {
                BridgeError::config(format!(
                    "event '{event_name}': unsupported parameter type '{}'",
                    param.kind
                ))
            })?;
            params.push((param, ty));
        }

        let types: Vec<String> = params.iter().map(|(p, _)| canonical_type(&p.kind)).collect();
        let signature = format!("{}({})", event_name, types.join(","));
        let topic = keccak256(signature.as_bytes());

        Ok(Self { name: event_name.to_string(), params, signature, topic })
    }

    /// Schema for `event_name` from the bundled door contract ABI.
    pub fn door_contract(event_name: &str) -> BridgeResult<Self> {
        Self::from_abi_str(DOOR_CONTRACT_ABI, event_name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn topic(&self) -> [u8; 32] {
        self.topic
    }

    pub fn topic_hex(&self) -> String {
        format!("0x{}", hex::encode(self.topic))
    }

    pub fn params(&self) -> impl Iterator<Item = &AbiParam> {
        self.params.iter().map(|(p, _)| p)
    }

    /// Decode `event` into named fields. Any shape mismatch is a
    /// `MalformedEvent` for that position.
    pub fn decode(&self, event: &Event) -> BridgeResult<DecodedEvent> {
        let position = event.position;
        let malformed = |reason: String| BridgeError::malformed(position, reason);

        match event.topics.first() {
            Some(t) if *t == self.topic => {}
            Some(t) => {
                return Err(malformed(format!(
                    "topic 0x{} does not match {}",
                    hex::encode(t),
                    self.signature
                )))
            }
            None => return Err(malformed("log has no topics".into())),
        }

        let indexed = self.params.iter().filter(|(p, _)| p.indexed).count();
        if event.topics.len() != indexed + 1 {
            return Err(malformed(format!(
                "expected {} indexed topics, got {}",
                indexed,
                event.topics.len() - 1
            )));
        }

        let mut fields = Map::new();
        let mut topics = event.topics[1..].iter();
        let mut head = 0usize;

        for (param, ty) in &self.params {
            let value = if param.indexed {
                let word = topics.next().ok_or_else(|| malformed("missing indexed topic".into()))?;
                if ty.is_dynamic() {
                    // Indexed dynamic values are stored as their hash.
                    Value::String(format!("0x{}", hex::encode(word)))
                } else {
                    decode_word(*ty, word).map_err(malformed)?
                }
            } else {
                let word = read_word(&event.data, head).map_err(malformed)?;
                let value = if ty.is_dynamic() {
                    let bytes = read_dynamic(&event.data, word).map_err(malformed)?;
                    decode_dynamic(*ty, bytes).map_err(malformed)?
                } else {
                    decode_word(*ty, word).map_err(malformed)?
                };
                head += WORD;
                value
            };
            fields.insert(param.name.clone(), value);
        }

        Ok(DecodedEvent { name: self.name.clone(), position, fields })
    }
}

/// An event with its parameters decoded by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub name: String,
    pub position: Position,
    pub fields: Map<String, Value>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Address-typed field as lowercase `0x…` hex.
    pub fn address(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| s.len() == 42 && s.starts_with("0x"))
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(bytes));
    out
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8; 32], String> {
    data.get(offset..offset + WORD)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| format!("data too short: need {} bytes, have {}", offset + WORD, data.len()))
}

fn word_to_usize(word: &[u8; 32]) -> Result<usize, String> {
    let value = U256::from_big_endian(word);
    if value > U256::from(u32::MAX) {
        return Err(format!("offset or length {value} out of range"));
    }
    Ok(value.low_u64() as usize)
}

fn read_dynamic<'a>(data: &'a [u8], offset_word: &[u8; 32]) -> Result<&'a [u8], String> {
    let offset = word_to_usize(offset_word)?;
    let len = word_to_usize(read_word(data, offset)?)?;
    let start = offset + WORD;
    data.get(start..start + len)
        .ok_or_else(|| format!("dynamic value of {len} bytes runs past end of data"))
}

fn decode_word(ty: ParamType, word: &[u8; 32]) -> Result<Value, String> {
    match ty {
        ParamType::Address => {
            if word[..12].iter().any(|b| *b != 0) {
                return Err("address word has non-zero padding".into());
            }
            Ok(Value::String(format!("0x{}", hex::encode(&word[12..]))))
        }
        ParamType::Bool => match U256::from_big_endian(word) {
            v if v.is_zero() => Ok(Value::Bool(false)),
            v if v == U256::one() => Ok(Value::Bool(true)),
            v => Err(format!("bool word holds {v}")),
        },
        ParamType::Uint => {
            let v = U256::from_big_endian(word);
            if v.bits() <= 64 {
                Ok(Value::from(v.low_u64()))
            } else {
                Ok(Value::String(v.to_string()))
            }
        }
        ParamType::Int => {
            let v = U256::from_big_endian(word);
            if word[0] & 0x80 == 0 {
                if v.bits() <= 63 {
                    Ok(Value::from(v.low_u64() as i64))
                } else {
                    Ok(Value::String(v.to_string()))
                }
            } else {
                let magnitude = (!v).overflowing_add(U256::one()).0;
                if magnitude.bits() <= 63 {
                    Ok(Value::from(-(magnitude.low_u64() as i64)))
                } else {
                    Ok(Value::String(format!("-{magnitude}")))
                }
            }
        }
        ParamType::FixedBytes(n) => Ok(Value::String(format!("0x{}", hex::encode(&word[..n])))),
        ParamType::Bytes | ParamType::String => Err("dynamic type in static slot".into()),
    }
}

fn decode_dynamic(ty: ParamType, bytes: &[u8]) -> Result<Value, String> {
    match ty {
        ParamType::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|_| "string value is not valid UTF-8".to_string()),
        ParamType::Bytes => Ok(Value::String(format!("0x{}", hex::encode(bytes)))),
        _ => Err("static type in dynamic slot".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn word_u64(v: u64) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[24..].copy_from_slice(&v.to_be_bytes());
        w
    }

    fn word_address(addr: &str) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(&hex::decode(addr.trim_start_matches("0x")).unwrap());
        w
    }

    fn encode_string(s: &str) -> Vec<u8> {
        let mut out = word_u64(s.len() as u64).to_vec();
        let mut padded = s.as_bytes().to_vec();
        padded.resize(s.len().div_ceil(32) * 32, 0);
        out.extend(padded);
        out
    }

    #[test]
    fn signature_topic_matches_known_vector() {
        let abi = json!([{
            "type": "event", "name": "Transfer", "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint", "indexed": false}
            ]
        }]);
        let schema = EventSchema::from_abi(&abi, "Transfer").unwrap();
        assert_eq!(schema.signature(), "Transfer(address,address,uint256)");
        assert_eq!(
            schema.topic_hex(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn door_contract_events_resolve() {
        let access = EventSchema::door_contract("newAccess").unwrap();
        assert_eq!(access.signature(), "newAccess()");
        assert_eq!(access.topic(), keccak256(b"newAccess()"));

        let guest = EventSchema::door_contract("updateGuest").unwrap();
        assert_eq!(guest.signature(), "updateGuest(address,string)");
        assert_eq!(guest.params().count(), 2);
    }

    #[test]
    fn missing_and_unsupported_events_are_config_errors() {
        let err = EventSchema::door_contract("openSesame").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));

        let abi = json!([{"type": "event", "name": "Batch", "inputs": [{"name": "ids", "type": "uint256[]"}]}]);
        assert!(matches!(EventSchema::from_abi(&abi, "Batch"), Err(BridgeError::Config(_))));

        let anon = json!([{"type": "event", "name": "Quiet", "anonymous": true, "inputs": []}]);
        assert!(matches!(EventSchema::from_abi(&anon, "Quiet"), Err(BridgeError::Config(_))));
    }

    #[test]
    fn decodes_address_and_string_data() {
        let schema = EventSchema::door_contract("updateGuest").unwrap();
        let guest = "0x8701b311cad384d7db2fa63b6179ae942707e4a4";

        let mut data = word_address(guest).to_vec();
        data.extend(word_u64(64));
        data.extend(encode_string("accept"));

        let event = Event::new(Position::new(12, 1))
            .with_topics(vec![schema.topic()])
            .with_data(data);
        let decoded = schema.decode(&event).unwrap();

        assert_eq!(decoded.name, "updateGuest");
        assert_eq!(decoded.address("guest"), Some(guest));
        assert_eq!(decoded.field("method"), Some(&json!("accept")));
    }

    #[test]
    fn decodes_indexed_and_signed_values() {
        let abi = json!([{
            "type": "event", "name": "Moved",
            "inputs": [
                {"name": "who", "type": "address", "indexed": true},
                {"name": "delta", "type": "int32", "indexed": false},
                {"name": "ok", "type": "bool", "indexed": false}
            ]
        }]);
        let schema = EventSchema::from_abi(&abi, "Moved").unwrap();

        let mut minus_five = [0xffu8; 32];
        minus_five[31] = 0xfb;
        let mut data = minus_five.to_vec();
        data.extend(word_u64(1));

        let who = "0x00000000000000000000000000000000000000aa";
        let event = Event::new(Position::new(1, 0))
            .with_topics(vec![schema.topic(), word_address(who)])
            .with_data(data);
        let decoded = schema.decode(&event).unwrap();

        assert_eq!(decoded.address("who"), Some(who));
        assert_eq!(decoded.field("delta"), Some(&json!(-5)));
        assert_eq!(decoded.field("ok"), Some(&json!(true)));
    }

    #[test]
    fn shape_mismatches_are_malformed() {
        let schema = EventSchema::door_contract("updateGuest").unwrap();

        // Truncated data
        let short = Event::new(Position::new(9, 0))
            .with_topics(vec![schema.topic()])
            .with_data(vec![0u8; 16]);
        assert!(matches!(
            schema.decode(&short),
            Err(BridgeError::MalformedEvent { position, .. }) if position == Position::new(9, 0)
        ));

        // Wrong event type
        let other = Event::new(Position::new(9, 1)).with_topics(vec![keccak256(b"newReset()")]);
        assert!(matches!(schema.decode(&other), Err(BridgeError::MalformedEvent { .. })));

        // No topics at all
        let bare = Event::new(Position::new(9, 2));
        assert!(matches!(schema.decode(&bare), Err(BridgeError::MalformedEvent { .. })));
    }
}
