//! Reassembly of tool calls that arrive fragmented across stream deltas.
//!
//! Tool calls arrive as **incremental fragments**, not as complete objects:
//!
//! ```text
//! Delta 1: { tool_calls: [{ index: 0, id: "call_abc123", function: { name: "get_weather" } }] }
//! Delta 2: { tool_calls: [{ index: 0, function: { arguments: "{\"loc" } }] }
//! Delta 3: { tool_calls: [{ index: 1, id: "call_def456", function: { name: "search" } }] }
//! Delta 4: { tool_calls: [{ index: 0, function: { arguments: "ation\":\"Paris\"}" } }] }
//! Delta 5: { finish_reason: "tool_calls" }
//! ```
//!
//! [`ToolCallAccumulator`] keeps one partial record per index and turns them into
//! [`ToolCall`]s when [`finalize`](ToolCallAccumulator::finalize) is called. Argument
//! text is concatenated verbatim; it is never parsed here, so JSON may be split at
//! any byte position.

use crate::types::ToolCall;

/// Highest fragment index accepted. Providers number parallel calls from zero,
/// so anything beyond this is treated as corrupt input.
pub const MAX_TOOL_CALL_INDEX: usize = 128;

/// One piece of a tool call as extracted from a single delta
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }
}

/// In-progress tool call for one index.
///
/// ```text
/// Initial state:     { id: None, name: None, arguments: "" }
/// After delta 1:     { id: Some("call_123"), name: Some("search"), arguments: "" }
/// After delta 2:     { id: Some("call_123"), name: Some("search"), arguments: "{\"q" }
/// ```
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Merges fragments by index and produces finalized tool calls once per turn.
///
/// Storage is a vector grown on demand up to [`MAX_TOOL_CALL_INDEX`]; the slot
/// position is the fragment index, so finalization order is ascending index
/// order without sorting.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: Vec<Option<PartialToolCall>>,
    finalized: bool,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one fragment into the partial call at its index.
    ///
    /// A non-empty `name` sets the name and an absent one never clears it.
    /// `id` binds when present. Arguments are always appended.
    /// Fragments arriving after finalization are ignored.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        if self.finalized {
            log::warn!(
                "dropping tool call fragment for index {} received after finalization",
                fragment.index
            );
            return;
        }

        if fragment.index > MAX_TOOL_CALL_INDEX {
            log::warn!(
                "rejecting tool call fragment with index {} (limit {})",
                fragment.index,
                MAX_TOOL_CALL_INDEX
            );
            return;
        }

        if self.slots.len() <= fragment.index {
            self.slots.resize_with(fragment.index + 1, || None);
        }
        let entry = self.slots[fragment.index].get_or_insert_with(PartialToolCall::default);

        if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
            entry.name = Some(name);
        }
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id = Some(id);
        }
        entry.arguments.push_str(&fragment.arguments);
    }

    /// Whether any fragment is waiting to be finalized
    pub fn has_pending(&self) -> bool {
        !self.finalized && self.slots.iter().any(Option::is_some)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Emits one [`ToolCall`] per tracked index, ascending.
    ///
    /// Calls without an id get a synthesized `call_<uuid>`; calls that never
    /// received a name are dropped. The first call consumes the state; later
    /// calls return an empty vector.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;

        std::mem::take(&mut self.slots)
            .into_iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let partial = slot?;
                let Some(name) = partial.name else {
                    log::warn!(
                        "dropping tool call at index {} that never received a name",
                        index
                    );
                    return None;
                };
                let id = partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                Some(ToolCall::new(id, name, partial.arguments))
            })
            .collect()
    }

    /// Drops all pending fragments without producing calls.
    ///
    /// Returns how many partial calls were discarded.
    pub fn discard(&mut self) -> usize {
        if self.finalized {
            return 0;
        }
        self.finalized = true;
        std::mem::take(&mut self.slots)
            .into_iter()
            .filter(Option::is_some)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate_in_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(
            ToolCallFragment::new(0)
                .with_id("call_123")
                .with_name("get_weather")
                .with_arguments(r#"{"loc"#),
        );
        acc.push(ToolCallFragment::new(0).with_arguments(r#"ation":"#));
        acc.push(ToolCallFragment::new(0).with_arguments(r#""Paris"}"#));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_123");
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"location":"Paris"}"#);
    }

    #[test]
    fn test_name_and_id_may_arrive_late() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_arguments("{\"q\":"));
        acc.push(ToolCallFragment::new(0).with_name("search").with_arguments("\"ru"));
        acc.push(ToolCallFragment::new(0).with_id("call_9").with_arguments("st\"}"));

        let calls = acc.finalize();
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn test_empty_name_never_clears() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_id("call_1").with_name("search"));
        acc.push(ToolCallFragment::new(0).with_name("").with_arguments("{}"));

        let calls = acc.finalize();
        assert_eq!(calls[0].function.name, "search");
    }

    #[test]
    fn test_interleaved_indices_finalize_ascending() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(2).with_id("c").with_name("third"));
        acc.push(ToolCallFragment::new(0).with_id("a").with_name("first"));
        acc.push(ToolCallFragment::new(1).with_id("b").with_name("second"));
        acc.push(ToolCallFragment::new(0).with_arguments("{}"));

        let names: Vec<_> = acc
            .finalize()
            .into_iter()
            .map(|c| c.function.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_id("call_1").with_name("noop"));

        assert_eq!(acc.finalize().len(), 1);
        assert!(acc.finalize().is_empty());
        assert!(acc.is_finalized());

        acc.push(ToolCallFragment::new(0).with_name("late"));
        assert!(acc.finalize().is_empty());
    }

    #[test]
    fn test_finalize_without_fragments() {
        let mut acc = ToolCallAccumulator::new();
        assert!(!acc.has_pending());
        assert!(acc.finalize().is_empty());
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_name("lookup"));
        acc.push(ToolCallFragment::new(1).with_name("lookup"));

        let calls = acc.finalize();
        assert!(calls[0].id.starts_with("call_"));
        assert!(calls[0].id.len() > "call_".len());
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_nameless_entries_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_id("orphan").with_arguments("{}"));
        acc.push(ToolCallFragment::new(1).with_id("call_1").with_name("ok"));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn test_index_ceiling() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(MAX_TOOL_CALL_INDEX + 1).with_name("huge"));
        assert!(!acc.has_pending());

        acc.push(ToolCallFragment::new(MAX_TOOL_CALL_INDEX).with_name("edge"));
        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "edge");
    }

    #[test]
    fn test_discard() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(ToolCallFragment::new(0).with_name("a"));
        acc.push(ToolCallFragment::new(3).with_name("b"));
        assert!(acc.has_pending());

        assert_eq!(acc.discard(), 2);
        assert!(!acc.has_pending());
        assert!(acc.finalize().is_empty());
    }
}
