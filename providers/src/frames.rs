//! Typed wire payloads carried in `data:` frames.
//!
//! Every field the backend may omit is defaulted so that an older or newer
//! server never makes a known frame kind fail to deserialize. An explicit
//! `null` counts as omitted.

use hearth_types::{ClarificationOption, Delegation, StreamEvent, TraceEvent, TraceId};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Frames that carry an explicit `type` discriminator.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum TypedFrame {
    #[serde(rename = "metadata")]
    Metadata {
        #[serde(default)]
        trace_id: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        tool_calls: Vec<Value>,
    },
    #[serde(rename = "trace")]
    Trace {
        #[serde(default)]
        agent: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        event: String,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        ts: Option<Value>,
        #[serde(default, deserialize_with = "null_as_default")]
        agents: Vec<Value>,
    },
    #[serde(rename = "status")]
    Status {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
    },
    #[serde(rename = "delegation")]
    Delegation {
        #[serde(default, deserialize_with = "null_as_default")]
        from: String,
        #[serde(default, deserialize_with = "null_as_default")]
        to: String,
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(default)]
        ts: Option<Value>,
    },
    #[serde(rename = "routing")]
    Routing {
        #[serde(default, deserialize_with = "null_as_default")]
        agent: String,
        #[serde(default)]
        confidence: Option<f64>,
        #[serde(default)]
        reasoning: Option<String>,
    },
    #[serde(rename = "clarification_options")]
    ClarificationOptions {
        #[serde(default, deserialize_with = "null_as_default")]
        options: Vec<Value>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(default, deserialize_with = "null_as_default")]
        recoverable: bool,
    },
    /// Forward compatibility: kinds this client does not know about.
    #[serde(other)]
    Unknown,
}

impl TypedFrame {
    /// Convert into a decoded event. `None` for unknown kinds.
    pub fn into_event(self) -> Option<StreamEvent> {
        let event = match self {
            TypedFrame::Metadata {
                trace_id,
                conversation_id,
                tool_calls,
            } => StreamEvent::Metadata {
                trace_id: trace_id.filter(|t| !t.is_empty()).map(TraceId::new),
                conversation_id: conversation_id.filter(|c| !c.is_empty()),
                tool_calls: tool_calls.iter().filter_map(name_of).collect(),
            },
            TypedFrame::Trace {
                agent,
                event,
                tool,
                ts,
                agents,
            } => StreamEvent::Trace(TraceEvent {
                agent,
                event,
                tool,
                ts: ts.as_ref().and_then(timestamp_text),
                agents: agents.iter().filter_map(name_of).collect(),
            }),
            TypedFrame::Status { content } => StreamEvent::Status(content),
            TypedFrame::Thinking { content } => StreamEvent::ThinkingDelta(content),
            TypedFrame::Delegation {
                from,
                to,
                content,
                ts,
            } => StreamEvent::Delegation(Delegation {
                from,
                to,
                content,
                ts: ts.as_ref().and_then(timestamp_text),
            }),
            TypedFrame::Routing {
                agent,
                confidence,
                reasoning,
            } => StreamEvent::Routing {
                agent,
                confidence,
                reasoning,
            },
            TypedFrame::ClarificationOptions { options } => StreamEvent::ClarificationOptions(
                options.iter().filter_map(clarification_option).collect(),
            ),
            TypedFrame::Error {
                content,
                recoverable,
            } => StreamEvent::Error {
                message: content,
                recoverable,
            },
            TypedFrame::Unknown => return None,
        };
        Some(event)
    }
}

/// Plain-text payloads. Two historical shapes are accepted.
#[derive(Debug, Default, Deserialize)]
pub struct ContentFrame {
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<Option<Choice>>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<ChoiceDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ContentFrame {
    /// Text contributed by this frame: the nested delta wins over the flat field.
    pub fn into_text(self) -> Option<String> {
        let nested = self
            .choices
            .into_iter()
            .next()
            .flatten()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content);
        nested.or(self.content)
    }
}

/// Extract the message of an explicit `{ "error": ... }` marker, if present.
pub fn error_marker(json: &Value) -> Option<String> {
    match json.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(obj) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown stream error")
                .to_string(),
        ),
        other => Some(other.to_string()),
    }
}

fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Object(obj) => obj
            .get("name")
            .or_else(|| obj.get("function").and_then(|f| f.get("name")))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn timestamp_text(value: &Value) -> Option<String> {
    match value {
        Value::String(ts) => Some(ts.clone()),
        Value::Number(ts) => Some(ts.to_string()),
        _ => None,
    }
}

fn clarification_option(value: &Value) -> Option<ClarificationOption> {
    match value {
        Value::String(label) => Some(ClarificationOption::new(label.clone())),
        Value::Object(obj) => {
            let label = obj
                .get("label")
                .or_else(|| obj.get("text"))
                .and_then(Value::as_str)?
                .to_string();
            let value = obj
                .get("value")
                .and_then(Value::as_str)
                .map_or_else(|| label.clone(), str::to_string);
            Some(ClarificationOption { label, value })
        }
        _ => None,
    }
}
