//! Authorization of parsed tool calls.
//!
//! A call must pass two checks, in order, before it reaches the session:
//!
//! 1. its name is on the [`Allowlist`] of tools permitted to run unattended;
//! 2. its name is in the [`Catalog`] the provider advertised.
//!
//! The first failing check decides the denial reason. A name that is
//! allowlisted but not advertised is still denied.

use std::collections::BTreeSet;
use std::fmt;

use crate::catalog::Catalog;
use crate::parser::ToolCall;

/// Static set of tool names allowed to execute without confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    names: BTreeSet<String>,
}

impl Allowlist {
    /// Build an allowlist from tool names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    /// Whether `name` may run unattended.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Allowlisted names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Why a call was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// The tool is not permitted to run unattended
    NotAllowlisted(String),
    /// The provider does not advertise the tool
    UnknownTool(String),
}

impl DenyReason {
    /// Whether the denial is security-relevant and belongs in the audit log.
    pub fn is_security_denial(&self) -> bool {
        matches!(self, DenyReason::NotAllowlisted(_))
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotAllowlisted(name) => {
                write!(f, "Tool '{}' is not allowed to run automatically", name)
            }
            DenyReason::UnknownTool(name) => {
                write!(f, "Tool '{}' not found in available tools", name)
            }
        }
    }
}

/// The result of authorizing a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// The call may be invoked.
    Allowed,
    /// The call is refused.
    Denied(DenyReason),
}

impl GateDecision {
    /// Returns true if the call may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }

    /// Returns the denial reason if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&DenyReason> {
        match self {
            GateDecision::Allowed => None,
            GateDecision::Denied(reason) => Some(reason),
        }
    }
}

/// Decide whether `call` may be invoked.
pub fn authorize(call: &ToolCall, allowlist: &Allowlist, catalog: &Catalog) -> GateDecision {
    if !allowlist.contains(&call.name) {
        return GateDecision::Denied(DenyReason::NotAllowlisted(call.name.clone()));
    }
    if !catalog.contains(&call.name) {
        return GateDecision::Denied(DenyReason::UnknownTool(call.name.clone()));
    }
    GateDecision::Allowed
}
