//! Call/result correlation shared by arbitration, orphan detection and the final sweep
//!
//! A tool call and its result correlate by id when both sides carry one, and
//! by tool name otherwise. Name-only matching is ambiguous when one turn holds
//! two calls to the same tool; ties resolve in first-match order.

use super::models::{FunctionCall, FunctionResponse};
use std::fmt;

/// Key identifying a logical call: its id if present, else its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Id(String),
    Name(String),
}

impl CorrelationKey {
    fn from_parts(id: Option<&str>, name: &str) -> Self {
        match id {
            Some(id) if !id.is_empty() => CorrelationKey::Id(id.to_string()),
            _ => CorrelationKey::Name(name.to_string()),
        }
    }

    pub fn for_call(call: &FunctionCall) -> Self {
        Self::from_parts(call.id.as_deref(), &call.name)
    }

    pub fn for_response(response: &FunctionResponse) -> Self {
        Self::from_parts(response.id.as_deref(), &response.name)
    }

    pub fn is_id(&self) -> bool {
        matches!(self, CorrelationKey::Id(_))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Id(id) => f.write_str(id),
            CorrelationKey::Name(name) => write!(f, "name:{}", name),
        }
    }
}

fn non_empty(id: Option<&str>) -> Option<&str> {
    id.filter(|s| !s.is_empty())
}

/// Fuzzy match: ids must agree when both sides have one, otherwise names must agree.
pub fn call_matches(call: &FunctionCall, response: &FunctionResponse) -> bool {
    match (non_empty(call.id.as_deref()), non_empty(response.id.as_deref())) {
        (Some(call_id), Some(response_id)) => call_id == response_id,
        _ => call.name == response.name,
    }
}

/// Whether the response carries the same non-empty id as the call.
pub fn exact_id_match(call: &FunctionCall, response: &FunctionResponse) -> bool {
    matches!(
        (non_empty(call.id.as_deref()), non_empty(response.id.as_deref())),
        (Some(a), Some(b)) if a == b
    )
}

/// Outstanding calls awaiting a result, consumed in first-match order.
#[derive(Debug, Default, Clone)]
pub struct CorrelationTable {
    open: Vec<FunctionCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_call(&mut self, call: &FunctionCall) {
        self.open.push(call.clone());
    }

    /// Resolve the first outstanding call the response matches, preferring an
    /// exact id match over a name match. Returns the resolved call.
    pub fn resolve(&mut self, response: &FunctionResponse) -> Option<FunctionCall> {
        let position = self
            .open
            .iter()
            .position(|call| exact_id_match(call, response))
            .or_else(|| self.open.iter().position(|call| call_matches(call, response)))?;
        Some(self.open.remove(position))
    }

    pub fn pending(&self) -> &[FunctionCall] {
        &self.open
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: Option<&str>, name: &str) -> FunctionCall {
        FunctionCall::new(id, name, json!({}))
    }

    fn response(id: Option<&str>, name: &str) -> FunctionResponse {
        FunctionResponse::new(id, name, json!({ "output": "ok" }))
    }

    #[test]
    fn test_key_prefers_id() {
        assert_eq!(
            CorrelationKey::for_call(&call(Some("7"), "grep")),
            CorrelationKey::Id("7".into())
        );
        assert_eq!(
            CorrelationKey::for_response(&response(None, "grep")).to_string(),
            "name:grep"
        );
        // Empty ids are treated as absent
        assert!(!CorrelationKey::for_call(&call(Some(""), "grep")).is_id());
    }

    #[test]
    fn test_fuzzy_matching() {
        assert!(call_matches(&call(Some("1"), "grep"), &response(Some("1"), "grep")));
        assert!(!call_matches(&call(Some("1"), "grep"), &response(Some("2"), "grep")));
        assert!(call_matches(&call(Some("1"), "grep"), &response(None, "grep")));
        assert!(call_matches(&call(None, "grep"), &response(Some("9"), "grep")));
        assert!(!call_matches(&call(None, "grep"), &response(None, "ls")));
    }

    #[test]
    fn test_table_prefers_exact_id_over_earlier_name_match() {
        let mut table = CorrelationTable::new();
        table.open_call(&call(None, "grep"));
        table.open_call(&call(Some("b"), "grep"));

        let resolved = table.resolve(&response(Some("b"), "grep")).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("b"));
        assert_eq!(table.pending().len(), 1);
    }

    #[test]
    fn test_name_only_matching_is_first_match_order() {
        // Known limitation: two same-name calls without ids resolve in order.
        let mut table = CorrelationTable::new();
        table.open_call(&call(None, "read_file"));
        table.open_call(&call(None, "read_file"));

        assert!(table.resolve(&response(None, "read_file")).is_some());
        assert!(table.resolve(&response(None, "read_file")).is_some());
        assert!(table.resolve(&response(None, "read_file")).is_none());
        assert!(table.is_empty());
    }
}
