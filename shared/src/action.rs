use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{AddressId, ParcelKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Flag,
    Approve,
    Reject,
}

/// Every mutation the user can trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Flag,
    Approve,
    Reject,
    Associate { target: ParcelKey },
    Delete,
    EditFields {
        id: AddressId,
        fields: Map<String, Value>,
    },
}

impl Action {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Associate { .. } => "associate",
            Self::Delete => "delete",
            Self::EditFields { .. } => "edit_fields",
        }
    }
}

/// Which rows a non-edit action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum ActionScope {
    #[default]
    Selection,
    Row(AddressId),
}
