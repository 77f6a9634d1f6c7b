use serde_json::Value;

/// Typed event stream consumed from a backend provider, decoded once at the
/// subscription boundary. Streaming text payloads are cumulative, not
/// incremental; the gateway computes deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    MessageCreated {
        session_id: String,
        message_id: String,
        role: String,
    },
    MessageUpdated {
        session_id: String,
        message_id: String,
        role: String,
    },
    PartCreated {
        session_id: String,
        message_id: String,
        part_id: String,
        text: String,
    },
    PartUpdated {
        session_id: String,
        message_id: String,
        part_id: String,
        text: String,
    },
    SessionCreated {
        session_id: String,
        title: String,
    },
    SessionUpdated {
        session_id: String,
        title: String,
    },
    SessionIdle {
        session_id: String,
    },
    PermissionAsked {
        session_id: String,
        request_id: String,
    },
    PermissionUpdated {
        session_id: String,
        request_id: String,
        granted: bool,
    },
    ToolStart {
        session_id: String,
        tool: String,
    },
    ToolEnd {
        session_id: String,
        tool: String,
    },
    Heartbeat,
    Unknown {
        event_type: String,
    },
}

impl BackendEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BackendEvent::MessageCreated { session_id, .. }
            | BackendEvent::MessageUpdated { session_id, .. }
            | BackendEvent::PartCreated { session_id, .. }
            | BackendEvent::PartUpdated { session_id, .. }
            | BackendEvent::SessionCreated { session_id, .. }
            | BackendEvent::SessionUpdated { session_id, .. }
            | BackendEvent::SessionIdle { session_id }
            | BackendEvent::PermissionAsked { session_id, .. }
            | BackendEvent::PermissionUpdated { session_id, .. }
            | BackendEvent::ToolStart { session_id, .. }
            | BackendEvent::ToolEnd { session_id, .. } => Some(session_id),
            BackendEvent::Heartbeat | BackendEvent::Unknown { .. } => None,
        }
    }

    /// Fill an empty session id with `session_id`. Single-session provider
    /// processes omit the field on the wire.
    pub fn with_default_session(mut self, default: &str) -> Self {
        if let Some(current) = self.session_id() {
            if current.is_empty() {
                match &mut self {
                    BackendEvent::MessageCreated { session_id, .. }
                    | BackendEvent::MessageUpdated { session_id, .. }
                    | BackendEvent::PartCreated { session_id, .. }
                    | BackendEvent::PartUpdated { session_id, .. }
                    | BackendEvent::SessionCreated { session_id, .. }
                    | BackendEvent::SessionUpdated { session_id, .. }
                    | BackendEvent::SessionIdle { session_id }
                    | BackendEvent::PermissionAsked { session_id, .. }
                    | BackendEvent::PermissionUpdated { session_id, .. }
                    | BackendEvent::ToolStart { session_id, .. }
                    | BackendEvent::ToolEnd { session_id, .. } => {
                        *session_id = default.to_string();
                    }
                    BackendEvent::Heartbeat | BackendEvent::Unknown { .. } => {}
                }
            }
        }
        self
    }
}

/// Decode one wire line into a typed event. Unparseable lines yield None;
/// recognized envelopes with unknown types yield `Unknown` so the consumer
/// can log them without breaking the stream.
pub fn decode_line(line: &str) -> Option<BackendEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    let event_type = object.get("type").and_then(Value::as_str)?;

    let event = match event_type {
        "message.created" => BackendEvent::MessageCreated {
            session_id: str_field(object, "session_id"),
            message_id: str_field(object, "message_id"),
            role: str_field(object, "role"),
        },
        "message.updated" => BackendEvent::MessageUpdated {
            session_id: str_field(object, "session_id"),
            message_id: str_field(object, "message_id"),
            role: str_field(object, "role"),
        },
        "message.part.created" => BackendEvent::PartCreated {
            session_id: str_field(object, "session_id"),
            message_id: str_field(object, "message_id"),
            part_id: str_field(object, "part_id"),
            text: str_field(object, "text"),
        },
        "message.part.updated" => BackendEvent::PartUpdated {
            session_id: str_field(object, "session_id"),
            message_id: str_field(object, "message_id"),
            part_id: str_field(object, "part_id"),
            text: str_field(object, "text"),
        },
        "session.created" => BackendEvent::SessionCreated {
            session_id: str_field(object, "session_id"),
            title: str_field(object, "title"),
        },
        "session.updated" => BackendEvent::SessionUpdated {
            session_id: str_field(object, "session_id"),
            title: str_field(object, "title"),
        },
        "session.idle" => BackendEvent::SessionIdle {
            session_id: str_field(object, "session_id"),
        },
        "permission.asked" => BackendEvent::PermissionAsked {
            session_id: str_field(object, "session_id"),
            request_id: str_field(object, "request_id"),
        },
        "permission.updated" => BackendEvent::PermissionUpdated {
            session_id: str_field(object, "session_id"),
            request_id: str_field(object, "request_id"),
            granted: object
                .get("granted")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        "tool.start" => BackendEvent::ToolStart {
            session_id: str_field(object, "session_id"),
            tool: str_field(object, "tool"),
        },
        "tool.end" => BackendEvent::ToolEnd {
            session_id: str_field(object, "session_id"),
            tool: str_field(object, "tool"),
        },
        "server.heartbeat" => BackendEvent::Heartbeat,
        other => BackendEvent::Unknown {
            event_type: other.to_string(),
        },
    };

    Some(event)
}

fn str_field(object: &serde_json::Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
