//! JSON payload encoding for bus requests and replies

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};

pub fn encode<T: Serialize>(value: &T) -> MessagingResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| MessagingError::message_serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> MessagingResult<T> {
    serde_json::from_slice(payload)
        .map_err(|e| MessagingError::message_deserialization(e.to_string()))
}

/// Best-effort `id` of a payload that failed to decode; nil when absent
pub fn recover_id(payload: &[u8]) -> Uuid {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|value| {
            value
                .get("id")
                .and_then(|id| id.as_str())
                .and_then(|id| Uuid::parse_str(id).ok())
        })
        .unwrap_or_else(Uuid::nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_id_from_partial_payload() {
        let id = Uuid::new_v4();
        let payload = format!(r#"{{"id": "{id}", "kind": 42}}"#);
        assert_eq!(recover_id(payload.as_bytes()), id);
    }

    #[test]
    fn test_recover_id_falls_back_to_nil() {
        assert_eq!(recover_id(b"not json"), Uuid::nil());
        assert_eq!(recover_id(br#"{"id": 7}"#), Uuid::nil());
        assert_eq!(recover_id(br#"[]"#), Uuid::nil());
    }

    #[test]
    fn test_decode_error_is_deserialization() {
        let err = decode::<crate::models::Step>(b"{}").unwrap_err();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }
}
