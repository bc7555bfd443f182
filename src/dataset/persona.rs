//! Persona styling merge.
//!
//! A stylised conversation is only a source of assistant wording. Its turns
//! are copied into the original item when, and only when, the two are
//! structurally identical; roles, order, tool-call ids and arguments always
//! come from the original.

use super::types::{DatasetItem, Role};

/// Outcome of merging one stylised conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Assistant text was taken from the stylised item.
    Styled(DatasetItem),
    /// The stylised item did not match; the original is kept unchanged.
    Kept(DatasetItem),
}

impl MergeOutcome {
    pub fn into_item(self) -> DatasetItem {
        match self {
            MergeOutcome::Styled(item) | MergeOutcome::Kept(item) => item,
        }
    }

    pub fn is_styled(&self) -> bool {
        matches!(self, MergeOutcome::Styled(_))
    }
}

/// Copies assistant text from `styled` into a clone of `original`.
///
/// Assistant turns without text in the original (pure tool calls) stay
/// without text, and a blank stylised text never replaces original text.
pub fn merge_styled(original: &DatasetItem, styled: &DatasetItem) -> MergeOutcome {
    if !original.same_structure(styled) {
        return MergeOutcome::Kept(original.clone());
    }

    let mut merged = original.clone();
    for (turn, styled_turn) in merged.conversations.iter_mut().zip(&styled.conversations) {
        if turn.from != Role::Assistant || turn.value.is_none() {
            continue;
        }
        if let Some(text) = styled_turn.value.as_ref().filter(|t| !t.trim().is_empty()) {
            turn.value = Some(text.clone());
        }
    }
    MergeOutcome::Styled(merged)
}
