//! Knowledge context builder.
//!
//! Serializes the active knowledge base into a single text block. Every
//! active entry becomes one stanza:
//!
//! ```text
//! ### [1] Insurance Basics
//! Type: text
//! Verify eligibility two business days before the appointment.
//!
//! ---
//!
//! ### [2] Phone Etiquette
//! Type: youtube
//! Source: https://youtu.be/abc123
//! Answer by the third ring.
//! ```
//!
//! Stanzas are ordered by creation time (ties broken by id), so identical
//! stores always yield identical blocks. Nothing is retrieved selectively:
//! the whole active set is included unless a token budget forces older
//! entries out.

use crate::context::token::estimate_tokens;
use crate::error::CoachError;
use dentcoach_core::knowledge::{KnowledgeEntry, KnowledgeStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Line placed between two stanzas.
const STANZA_DELIMITER: &str = "\n\n---\n\n";

/// Tokens reserved per stanza for its numbered header and the delimiter.
const STANZA_OVERHEAD_TOKENS: usize = 4;

/// Grounding text when the store has no active entries.
pub const EMPTY_MARKER: &str = "(No knowledge base entries are available. For any topic, say it \
isn't covered in our current resources before offering general recommendations.)";

/// Grounding text when the store could not be read.
pub const UNAVAILABLE_MARKER: &str = "(The knowledge base is currently unavailable. For any topic, \
say it isn't covered in our current resources before offering general recommendations.)";

/// Whether a turn was grounded in knowledge base content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingStatus {
    /// At least one entry was included.
    Available,
    /// The store was readable but nothing was included.
    Empty,
    /// The store could not be read; the block is a marker only.
    Unavailable,
}

impl GroundingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Empty => "empty",
            Self::Unavailable => "unavailable",
        }
    }
}

/// The serialized grounding context for one chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    /// Text placed verbatim under the prompt's knowledge section
    pub text: String,
    /// IDs of the entries rendered, in render order
    pub included: Vec<String>,
    /// Active entries left out to respect the token budget
    pub omitted: usize,
    /// Estimated token count of `text`
    pub tokens: usize,
    pub status: GroundingStatus,
}

impl ContextBlock {
    fn marker(text: &str, status: GroundingStatus) -> Self {
        Self {
            text: text.to_string(),
            included: Vec::new(),
            omitted: 0,
            tokens: estimate_tokens(text),
            status,
        }
    }

    /// Block used when the knowledge base cannot be read.
    pub fn unavailable() -> Self {
        Self::marker(UNAVAILABLE_MARKER, GroundingStatus::Unavailable)
    }

    pub fn is_grounded(&self) -> bool {
        self.status == GroundingStatus::Available
    }
}

/// Build a context block from a snapshot of entries with no size limit.
///
/// Inactive entries are skipped even if the caller passes them.
pub fn build_from_entries(entries: &[KnowledgeEntry]) -> ContextBlock {
    build_with_budget(entries, None)
}

/// Build a context block, keeping the estimated size within `budget` tokens.
///
/// When the active set does not fit, entries are admitted most recently
/// updated first until the next one would exceed the budget. The admitted
/// entries are still rendered in creation order. Entries are never cut
/// mid-content.
pub fn build_with_budget(entries: &[KnowledgeEntry], budget: Option<usize>) -> ContextBlock {
    let mut active: Vec<&KnowledgeEntry> = entries.iter().filter(|e| e.is_active).collect();
    if active.is_empty() {
        return ContextBlock::marker(EMPTY_MARKER, GroundingStatus::Empty);
    }
    active.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let total = active.len();
    let admitted = match budget {
        Some(limit) => admit_within(&active, limit),
        None => active,
    };
    let omitted = total - admitted.len();

    let mut text = admitted
        .iter()
        .enumerate()
        .map(|(i, entry)| render_stanza(i + 1, entry))
        .collect::<Vec<_>>()
        .join(STANZA_DELIMITER);

    if omitted > 0 {
        warn!(
            omitted,
            included = admitted.len(),
            budget = budget.unwrap_or_default(),
            "Knowledge base exceeds context budget; omitting older entries"
        );
        if text.is_empty() {
            text.push_str(EMPTY_MARKER);
        }
        text.push_str("\n\n");
        text.push_str(&format!(
            "({omitted} older knowledge entries omitted to fit the context window)"
        ));
    }

    let status = if admitted.is_empty() {
        GroundingStatus::Empty
    } else {
        GroundingStatus::Available
    };

    ContextBlock {
        tokens: estimate_tokens(&text),
        included: admitted.iter().map(|e| e.id.clone()).collect(),
        omitted,
        text,
        status,
    }
}

/// Pick the entries that fit, newest updates first, preserving the input
/// (creation) order in the result.
fn admit_within<'a>(ordered: &[&'a KnowledgeEntry], budget: usize) -> Vec<&'a KnowledgeEntry> {
    let mut by_recency: Vec<(usize, &KnowledgeEntry)> =
        ordered.iter().copied().enumerate().collect();
    by_recency.sort_by(|(_, a), (_, b)| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut used = 0;
    let mut keep = vec![false; ordered.len()];
    for (position, entry) in by_recency {
        let cost = estimate_tokens(&render_stanza(0, entry)) + STANZA_OVERHEAD_TOKENS;
        if used + cost > budget {
            break;
        }
        used += cost;
        keep[position] = true;
    }

    ordered
        .iter()
        .zip(keep)
        .filter_map(|(entry, kept)| kept.then_some(*entry))
        .collect()
}

fn render_stanza(index: usize, entry: &KnowledgeEntry) -> String {
    let mut stanza = format!("### [{index}] {}\nType: {}\n", entry.title, entry.kind);
    if let Some(url) = &entry.source_url {
        stanza.push_str(&format!("Source: {url}\n"));
    }
    stanza.push_str(entry.content.trim_end());
    stanza
}

/// Reads the store and builds the context block for each chat turn.
///
/// Holds no cache: every call sees the store's current state.
#[derive(Clone)]
pub struct KnowledgeContextBuilder {
    store: Arc<dyn KnowledgeStore>,
    budget: Option<usize>,
}

impl KnowledgeContextBuilder {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            budget: None,
        }
    }

    /// Set the token budget. `None` means unlimited.
    pub fn with_budget(mut self, budget: Option<usize>) -> Self {
        self.budget = budget;
        self
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Read all active entries and build the block.
    pub async fn build(&self) -> Result<ContextBlock, CoachError> {
        let entries = self
            .store
            .list_active()
            .await
            .map_err(CoachError::ContextUnavailable)?;
        let block = build_with_budget(&entries, self.budget);
        debug!(
            store = self.store.name(),
            included = block.included.len(),
            omitted = block.omitted,
            tokens = block.tokens,
            "Built knowledge context"
        );
        Ok(block)
    }

    /// Like [`build`](Self::build), but a store failure yields the
    /// unavailable marker instead of an error.
    pub async fn build_or_degrade(&self) -> ContextBlock {
        match self.build().await {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, store = self.store.name(), "Proceeding without grounding");
                ContextBlock::unavailable()
            }
        }
    }
}
