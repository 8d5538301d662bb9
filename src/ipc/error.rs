use serde_json::json;

/// Success envelope: object payloads are flattened next to `success`.
pub fn ok(id: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut envelope = json!({
        "id": id,
        "success": true,
    });
    match payload {
        serde_json::Value::Object(map) => {
            if let Some(obj) = envelope.as_object_mut() {
                for (k, v) in map {
                    if k != "id" && k != "success" {
                        obj.insert(k, v);
                    }
                }
            }
        }
        serde_json::Value::Null => {}
        other => envelope["result"] = other,
    }
    envelope
}

/// Failure envelope for protocol-level problems that never reach a handler.
pub fn err(id: Option<&str>, code: &str, message: impl Into<String>, status: u16) -> serde_json::Value {
    json!({
        "id": id,
        "success": false,
        "error": message.into(),
        "code": code,
        "status": status,
    })
}
