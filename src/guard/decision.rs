use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

/// How a request is to be treated. `reasoning` is whatever explanation the
/// analysis service gave; it is logged and, for block and error, returned to
/// the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow {
        reasoning: Option<String>,
    },
    Block {
        status_code: Option<u16>,
        reasoning: String,
    },
    Redirect {
        target_url: Option<String>,
        reasoning: Option<String>,
    },
    Transform {
        headers: BTreeMap<String, String>,
        reasoning: Option<String>,
    },
    Error {
        reasoning: String,
    },
}

impl Decision {
    pub fn allow() -> Self {
        Self::Allow { reasoning: None }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Allow { .. } => "allow",
            Self::Block { .. } => "block",
            Self::Redirect { .. } => "redirect",
            Self::Transform { .. } => "transform",
            Self::Error { .. } => "error",
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Self::Allow { reasoning }
            | Self::Redirect { reasoning, .. }
            | Self::Transform { reasoning, .. } => reasoning.as_deref(),
            Self::Block { reasoning, .. } | Self::Error { reasoning } => Some(reasoning.as_str()),
        }
    }

    pub fn from_json(raw: &[u8]) -> GuardResult<Self> {
        let wire: DecisionWire = serde_json::from_slice(raw)?;
        Self::try_from(wire)
    }
}

/// Decision as exchanged with the analysis service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionWire {
    pub action: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Modifications>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modifications {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl TryFrom<DecisionWire> for Decision {
    type Error = GuardError;

    fn try_from(wire: DecisionWire) -> Result<Self, GuardError> {
        let reasoning = wire.reasoning.filter(|r| !r.is_empty());
        match wire.action.as_str() {
            "allow" => Ok(Self::Allow { reasoning }),
            "block" => Ok(Self::Block {
                status_code: wire.status_code,
                reasoning: reasoning.unwrap_or_default(),
            }),
            "redirect" => Ok(Self::Redirect {
                target_url: wire.redirect_url.filter(|url| !url.is_empty()),
                reasoning,
            }),
            "transform" => Ok(Self::Transform {
                headers: wire.modifications.map(|m| m.headers).unwrap_or_default(),
                reasoning,
            }),
            "error" => Ok(Self::Error {
                reasoning: reasoning.unwrap_or_default(),
            }),
            other => Err(GuardError::MalformedDecision(format!(
                "unknown action kind: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::Decision;
    use crate::error::GuardError;

    #[test]
    fn parses_each_action_kind() {
        assert_eq!(
            Decision::from_json(br#"{"action":"allow","reasoning":"benign"}"#).unwrap(),
            Decision::Allow {
                reasoning: Some("benign".to_string()),
            }
        );
        assert_eq!(
            Decision::from_json(br#"{"action":"block","reasoning":"bot","statusCode":429}"#)
                .unwrap(),
            Decision::Block {
                status_code: Some(429),
                reasoning: "bot".to_string(),
            }
        );
        assert_eq!(
            Decision::from_json(br#"{"action":"redirect","redirectUrl":"/login"}"#).unwrap(),
            Decision::Redirect {
                target_url: Some("/login".to_string()),
                reasoning: None,
            }
        );
        assert_eq!(
            Decision::from_json(br#"{"action":"error","reasoning":"upstream down"}"#).unwrap(),
            Decision::Error {
                reasoning: "upstream down".to_string(),
            }
        );

        let transform = Decision::from_json(
            br#"{"action":"transform","modifications":{"headers":{"x-client":"mobile"}}}"#,
        )
        .unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("x-client".to_string(), "mobile".to_string());
        assert_eq!(transform, Decision::Transform {
            headers,
            reasoning: None,
        });
    }

    #[test]
    fn reasoning_is_kept_for_every_action() {
        for action in ["allow", "block", "redirect", "transform", "error"] {
            let raw = format!(r#"{{"action":"{action}","reasoning":"looked at headers"}}"#);
            let decision = Decision::from_json(raw.as_bytes()).unwrap();
            assert_eq!(decision.action(), action);
            assert_eq!(decision.reasoning(), Some("looked at headers"));
        }

        assert_eq!(Decision::allow().reasoning(), None);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = Decision::from_json(br#"{"action":"quarantine"}"#).unwrap_err();
        assert!(matches!(err, GuardError::MalformedDecision(_)));
    }

    #[test]
    fn unparseable_payload_is_rejected() {
        let err = Decision::from_json(b"Sure! Here is my analysis").unwrap_err();
        assert!(matches!(err, GuardError::MalformedDecision(_)));
    }
}
