// resilient_ws_client/src/message.rs

//! 定义 WebSocket 通信中使用的消息信封与保活哨兵帧。
//!
//! 线上的每一个非哨兵文本帧都是一个 JSON 对象，且至少带有字符串类型的 `type` 字段，
//! 其余字段由应用自行定义。`__ping__` / `__pong__` 两个字面量文本帧只用于保活，
//! 不属于信封格式。

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::WsError;

/// 出站/入站保活探测帧。
pub const PING_FRAME: &str = "__ping__";
/// 对保活探测的应答帧。
pub const PONG_FRAME: &str = "__pong__";

/// 经过校验的入站消息信封。
///
/// `data` 保留了完整的原始 JSON 对象（包括 `type` 字段），处理器可以按需取用其它字段。
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 消息的业务类型，用于路由到对应的处理器。
    pub message_type: String,
    /// 完整的消息对象。
    pub data: Value,
}

impl Envelope {
    /// 便捷方法：读取信封中的某个字段。
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// 一个入站文本帧的分类结果。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ping,
    Pong,
    Envelope(Envelope),
}

/// 对收到的文本帧进行分类：保活哨兵直接识别，其余按信封解析并校验。
pub fn classify_frame(text: &str) -> Result<InboundFrame, WsError> {
    match text {
        PING_FRAME => Ok(InboundFrame::Ping),
        PONG_FRAME => Ok(InboundFrame::Pong),
        _ => parse_envelope(text).map(InboundFrame::Envelope),
    }
}

/// 将文本解析为 JSON 并校验它是带有字符串 `type` 字段的对象。
pub fn parse_envelope(text: &str) -> Result<Envelope, WsError> {
    let data: Value = serde_json::from_str(text)
        .map_err(|e| WsError::DeserializationError(format!("JSON 解析失败: {}", e)))?;

    let message_type = match &data {
        Value::Object(map) => match map.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => {
                return Err(WsError::DeserializationError(
                    "消息缺少字符串类型的 type 字段".to_string(),
                ))
            }
        },
        _ => {
            return Err(WsError::DeserializationError(
                "消息格式不正确: 不是 JSON 对象".to_string(),
            ))
        }
    };

    Ok(Envelope { message_type, data })
}

/// 生成形如 `msg_<毫秒时间戳>_<9位随机串>` 的消息标识。
pub fn generate_message_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("msg_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

/// 为任意载荷补齐 `type`、`timestamp`（ISO-8601）与 `messageId` 字段。
///
/// 对象载荷的字段会被平铺到信封中；`null` 不贡献任何字段；其它类型的值放在 `payload` 字段下。
/// 载荷自带的 `type` 会覆盖参数给出的类型，`timestamp` 与 `messageId` 则总是由这里生成。
pub fn augment_envelope(message_type: &str, payload: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(message_type.to_string()));
    match payload {
        Value::Object(fields) => map.extend(fields),
        Value::Null => {}
        other => {
            map.insert("payload".to_string(), other);
        }
    }
    map.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    map.insert("messageId".to_string(), Value::String(generate_message_id()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinel_frames_are_not_envelopes() {
        assert_eq!(classify_frame("__ping__").unwrap(), InboundFrame::Ping);
        assert_eq!(classify_frame("__pong__").unwrap(), InboundFrame::Pong);
    }

    #[test]
    fn test_valid_envelope_keeps_whole_object() {
        let frame = classify_frame(r#"{"type":"chat","text":"你好"}"#).expect("合法信封应解析成功");
        match frame {
            InboundFrame::Envelope(env) => {
                assert_eq!(env.message_type, "chat");
                assert_eq!(env.field("text"), Some(&json!("你好")));
                assert_eq!(env.data["type"], "chat");
            }
            other => panic!("预期得到信封，实际为 {:?}", other),
        }
    }

    #[test]
    fn test_invalid_frames_are_rejected() {
        for raw in ["not json", "null", "42", r#"["type"]"#, r#"{"kind":"x"}"#, r#"{"type":7}"#, r#"{"type":""}"#] {
            let result = parse_envelope(raw);
            assert!(
                matches!(result, Err(WsError::DeserializationError(_))),
                "帧 {} 应被拒绝，实际为 {:?}",
                raw,
                result
            );
        }
    }

    #[test]
    fn test_augment_envelope_adds_required_fields() {
        let value = augment_envelope("join", json!({ "room": "a" }));
        assert_eq!(value["type"], "join");
        assert_eq!(value["room"], "a");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        let id = value["messageId"].as_str().unwrap();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.rsplit('_').next().unwrap().len(), 9);
    }

    #[test]
    fn test_augment_envelope_wraps_non_object_payload() {
        let value = augment_envelope("numbers", json!([1, 2, 3]));
        assert_eq!(value["payload"], json!([1, 2, 3]));
        let empty = augment_envelope("bare", Value::Null);
        assert_eq!(empty.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_payload_type_overrides_given_type_but_not_generated_fields() {
        let value = augment_envelope(
            "outer",
            json!({ "type": "inner", "timestamp": "stale", "messageId": "stale" }),
        );
        assert_eq!(value["type"], "inner");
        assert_ne!(value["timestamp"], "stale");
        assert_ne!(value["messageId"], "stale");
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(generate_message_id(), generate_message_id());
    }
}
