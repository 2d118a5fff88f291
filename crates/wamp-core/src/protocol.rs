//! WAMP v1 frame codec.
//!
//! Frames are JSON arrays whose first element is the message type.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::errors::ProtocolError;
use crate::topic::TopicArg;

pub const MSG_WELCOME: i64 = 0;
pub const MSG_PREFIX: i64 = 1;
pub const MSG_CALL: i64 = 2;
pub const MSG_CALL_RESULT: i64 = 3;
pub const MSG_CALL_ERROR: i64 = 4;
pub const MSG_SUBSCRIBE: i64 = 5;
pub const MSG_UNSUBSCRIBE: i64 = 6;
pub const MSG_PUBLISH: i64 = 7;
pub const MSG_EVENT: i64 = 8;

pub const PROTOCOL_VERSION: u64 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum WampMessage {
    Welcome {
        session_id: String,
        protocol_version: u64,
        server_ident: String,
    },
    Prefix {
        prefix: String,
        uri: String,
    },
    Call {
        call_id: String,
        procedure: TopicArg,
        params: Vec<Value>,
    },
    CallResult {
        call_id: String,
        result: Value,
    },
    CallError {
        call_id: String,
        error_uri: String,
        description: String,
        details: Option<Value>,
    },
    Subscribe {
        topic: TopicArg,
    },
    Unsubscribe {
        topic: TopicArg,
    },
    Publish {
        topic: TopicArg,
        event: Value,
        exclude_me: bool,
        exclude: Vec<String>,
        eligible: Vec<String>,
    },
    Event {
        topic: String,
        event: Value,
    },
}

impl WampMessage {
    pub fn message_type(&self) -> i64 {
        match self {
            Self::Welcome { .. } => MSG_WELCOME,
            Self::Prefix { .. } => MSG_PREFIX,
            Self::Call { .. } => MSG_CALL,
            Self::CallResult { .. } => MSG_CALL_RESULT,
            Self::CallError { .. } => MSG_CALL_ERROR,
            Self::Subscribe { .. } => MSG_SUBSCRIBE,
            Self::Unsubscribe { .. } => MSG_UNSUBSCRIBE,
            Self::Publish { .. } => MSG_PUBLISH,
            Self::Event { .. } => MSG_EVENT,
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn to_value(&self) -> Value {
        let kind = self.message_type();
        match self {
            Self::Welcome {
                session_id,
                protocol_version,
                server_ident,
            } => json!([kind, session_id, protocol_version, server_ident]),
            Self::Prefix { prefix, uri } => json!([kind, prefix, uri]),
            Self::Call {
                call_id,
                procedure,
                params,
            } => {
                let mut frame = vec![json!(kind), json!(call_id), procedure.to_value()];
                frame.extend(params.iter().cloned());
                Value::Array(frame)
            }
            Self::CallResult { call_id, result } => json!([kind, call_id, result]),
            Self::CallError {
                call_id,
                error_uri,
                description,
                details,
            } => match details {
                Some(details) => json!([kind, call_id, error_uri, description, details]),
                None => json!([kind, call_id, error_uri, description]),
            },
            Self::Subscribe { topic } | Self::Unsubscribe { topic } => {
                json!([kind, topic.to_value()])
            }
            Self::Publish {
                topic,
                event,
                exclude_me,
                exclude,
                eligible,
            } => {
                let topic = topic.to_value();
                if !eligible.is_empty() {
                    json!([kind, topic, event, exclude, eligible])
                } else if !exclude.is_empty() {
                    json!([kind, topic, event, exclude])
                } else if *exclude_me {
                    json!([kind, topic, event, true])
                } else {
                    json!([kind, topic, event])
                }
            }
            Self::Event { topic, event } => json!([kind, topic, event]),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(ProtocolError::Malformed("expected a JSON array".into()));
        };
        let mut items = items.into_iter();
        let kind = items
            .next()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ProtocolError::Malformed("missing message type".into()))?;

        match kind {
            MSG_WELCOME => Ok(Self::Welcome {
                session_id: string_field(items.next(), "session id")?,
                protocol_version: items.next().and_then(|v| v.as_u64()).unwrap_or(PROTOCOL_VERSION),
                server_ident: items
                    .next()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
            }),
            MSG_PREFIX => Ok(Self::Prefix {
                prefix: string_field(items.next(), "prefix")?,
                uri: string_field(items.next(), "prefix uri")?,
            }),
            MSG_CALL => Ok(Self::Call {
                call_id: string_field(items.next(), "call id")?,
                procedure: topic_field(items.next())?,
                params: items.collect(),
            }),
            MSG_CALL_RESULT => Ok(Self::CallResult {
                call_id: string_field(items.next(), "call id")?,
                result: items.next().unwrap_or(Value::Null),
            }),
            MSG_CALL_ERROR => Ok(Self::CallError {
                call_id: string_field(items.next(), "call id")?,
                error_uri: string_field(items.next(), "error uri")?,
                description: string_field(items.next(), "error description")?,
                details: items.next(),
            }),
            MSG_SUBSCRIBE => Ok(Self::Subscribe {
                topic: topic_field(items.next())?,
            }),
            MSG_UNSUBSCRIBE => Ok(Self::Unsubscribe {
                topic: topic_field(items.next())?,
            }),
            MSG_PUBLISH => {
                let topic = topic_field(items.next())?;
                let event = items.next().ok_or(ProtocolError::InvalidField {
                    field: "event",
                    reason: "missing".into(),
                })?;
                let (exclude_me, exclude) = match items.next() {
                    None => (false, Vec::new()),
                    Some(Value::Bool(flag)) => (flag, Vec::new()),
                    Some(Value::Array(list)) => (false, session_list(list, "exclude")?),
                    Some(_) => {
                        return Err(ProtocolError::InvalidField {
                            field: "exclude",
                            reason: "expected bool or array".into(),
                        })
                    }
                };
                let eligible = match items.next() {
                    None => Vec::new(),
                    Some(Value::Array(list)) => session_list(list, "eligible")?,
                    Some(_) => {
                        return Err(ProtocolError::InvalidField {
                            field: "eligible",
                            reason: "expected array".into(),
                        })
                    }
                };
                Ok(Self::Publish {
                    topic,
                    event,
                    exclude_me,
                    exclude,
                    eligible,
                })
            }
            MSG_EVENT => Ok(Self::Event {
                topic: string_field(items.next(), "topic")?,
                event: items.next().unwrap_or(Value::Null),
            }),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Expand a CURIE (`prefix:rest`) using the connection's registered prefixes.
/// URIs without a known prefix are returned unchanged.
pub fn expand_curie(uri: &str, prefixes: &HashMap<String, String>) -> String {
    match uri.split_once(':') {
        Some((prefix, rest)) => match prefixes.get(prefix) {
            Some(base) => format!("{base}{rest}"),
            None => uri.to_string(),
        },
        None => uri.to_string(),
    }
}

fn string_field(value: Option<Value>, field: &'static str) -> Result<String, ProtocolError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProtocolError::InvalidField {
            field,
            reason: "expected string".into(),
        }),
        None => Err(ProtocolError::InvalidField {
            field,
            reason: "missing".into(),
        }),
    }
}

fn topic_field(value: Option<Value>) -> Result<TopicArg, ProtocolError> {
    value.map(TopicArg::from_value).ok_or(ProtocolError::InvalidField {
        field: "topic",
        reason: "missing".into(),
    })
}

fn session_list(list: Vec<Value>, field: &'static str) -> Result<Vec<String>, ProtocolError> {
    list.into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            _ => Err(ProtocolError::InvalidField {
                field,
                reason: "expected session id strings".into(),
            }),
        })
        .collect()
}
