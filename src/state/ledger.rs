//! Append-only record of every prompt submitted, per player and round.
//!
//! The ledger is the only place where a [`PromptId`] is minted, and it only
//! mints one for an entry whose generation produced an image.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::game::{EntryId, PlayerId, PromptId, Round};

/// Why image generation failed for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// The backend refused the prompt on content grounds.
    PolicyViolation,
    /// The backend answered without any candidate.
    NoCandidates,
    /// The backend answered with an error status.
    ApiError,
    /// A candidate came back without image bytes.
    NoImageData,
    /// The backend could not be reached.
    Unavailable,
}

impl GenerationErrorKind {
    /// Stable identifier used on the wire and in persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyViolation => "policy_violation",
            Self::NoCandidates => "no_candidates",
            Self::ApiError => "api_error",
            Self::NoImageData => "no_image_data",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Result of one generation attempt, exactly one of image or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// An image was produced.
    Image {
        /// Reference (URL or data URI) to the image.
        image_ref: String,
    },
    /// Generation failed.
    Failed {
        /// Failure classification.
        error_type: GenerationErrorKind,
        /// Backend message, for the admin and persistence only.
        message: Option<String>,
    },
}

/// Lifecycle of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Generation still running.
    Pending,
    /// Generation produced an image; the entry is selectable.
    Valid {
        /// Image reference.
        image_ref: String,
        /// Server-issued selectable identifier.
        prompt_id: PromptId,
    },
    /// Generation failed; the entry is never selectable.
    Error {
        /// Failure classification.
        error_type: GenerationErrorKind,
        /// Backend message.
        message: Option<String>,
    },
}

/// One submission and its generation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Ledger-wide identifier.
    pub id: EntryId,
    /// Author.
    pub player: PlayerId,
    /// Round the prompt was submitted in.
    pub round: Round,
    /// 1-based position among the author's entries for the round.
    pub sequence: u32,
    /// Prompt text as submitted.
    pub prompt: String,
    /// Generation state.
    pub status: EntryStatus,
}

impl LedgerEntry {
    /// Selectable identifier, present only for valid entries.
    pub fn prompt_id(&self) -> Option<PromptId> {
        match &self.status {
            EntryStatus::Valid { prompt_id, .. } => Some(*prompt_id),
            _ => None,
        }
    }

    /// Image reference, present only for valid entries.
    pub fn image_ref(&self) -> Option<&str> {
        match &self.status {
            EntryStatus::Valid { image_ref, .. } => Some(image_ref),
            _ => None,
        }
    }

    /// Failure classification, present only for error entries.
    pub fn error_type(&self) -> Option<GenerationErrorKind> {
        match &self.status {
            EntryStatus::Error { error_type, .. } => Some(*error_type),
            _ => None,
        }
    }

    /// True when generation produced an image.
    pub fn is_valid(&self) -> bool {
        matches!(self.status, EntryStatus::Valid { .. })
    }

    /// True while generation is still running.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, EntryStatus::Pending)
    }
}

/// Failures raised by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No entry carries the identifier.
    #[error("unknown ledger entry `{0}`")]
    UnknownEntry(EntryId),
    /// The entry already has an outcome.
    #[error("ledger entry `{0}` is already completed")]
    AlreadyCompleted(EntryId),
}

/// Ledger of every submission of the current game.
#[derive(Debug, Clone, Default)]
pub struct SubmissionLedger {
    entries: IndexMap<EntryId, LedgerEntry>,
    prompts: HashMap<PromptId, EntryId>,
    next_entry: u64,
    next_prompt: u64,
}

impl SubmissionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission whose generation is about to start.
    pub fn append(&mut self, player: PlayerId, round: Round, prompt: impl Into<String>) -> EntryId {
        self.next_entry += 1;
        let id = EntryId(self.next_entry);
        let sequence = self.count(&player, round) as u32 + 1;
        self.entries.insert(
            id,
            LedgerEntry {
                id,
                player,
                round,
                sequence,
                prompt: prompt.into(),
                status: EntryStatus::Pending,
            },
        );
        id
    }

    /// Attach the generation outcome to a pending entry.
    ///
    /// A valid outcome gets a fresh [`PromptId`]; an error outcome never does.
    pub fn complete(
        &mut self,
        id: EntryId,
        outcome: GenerationOutcome,
    ) -> Result<&LedgerEntry, LedgerError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(LedgerError::UnknownEntry(id))?;
        if !entry.is_pending() {
            return Err(LedgerError::AlreadyCompleted(id));
        }

        entry.status = match outcome {
            GenerationOutcome::Image { image_ref } => {
                self.next_prompt += 1;
                let prompt_id = PromptId(self.next_prompt);
                self.prompts.insert(prompt_id, id);
                EntryStatus::Valid {
                    image_ref,
                    prompt_id,
                }
            }
            GenerationOutcome::Failed {
                error_type,
                message,
            } => EntryStatus::Error {
                error_type,
                message,
            },
        };
        Ok(entry)
    }

    /// Look an entry up.
    pub fn get(&self, id: &EntryId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// Resolve a selectable identifier to its (necessarily valid) entry.
    pub fn find_by_prompt(&self, prompt_id: PromptId) -> Option<&LedgerEntry> {
        self.prompts
            .get(&prompt_id)
            .and_then(|id| self.entries.get(id))
    }

    /// All entries of a player for a round in submission order, errors included.
    pub fn entries(&self, player: &PlayerId, round: Round) -> impl Iterator<Item = &LedgerEntry> {
        let player = *player;
        self.entries
            .values()
            .filter(move |e| e.player == player && e.round == round)
    }

    /// Valid entries of a player for a round in submission order.
    pub fn valid_entries(
        &self,
        player: &PlayerId,
        round: Round,
    ) -> impl Iterator<Item = &LedgerEntry> {
        self.entries(player, round).filter(|e| e.is_valid())
    }

    /// Latest valid entry of a player for a round.
    pub fn last_valid(&self, player: &PlayerId, round: Round) -> Option<&LedgerEntry> {
        self.valid_entries(player, round).last()
    }

    /// Number of submissions of a player for a round.
    pub fn count(&self, player: &PlayerId, round: Round) -> usize {
        self.entries(player, round).count()
    }

    /// Entries whose generation failed, in submission order.
    pub fn errors(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries
            .values()
            .filter(|e| matches!(e.status, EntryStatus::Error { .. }))
    }

    /// Number of submissions of a player over the whole game.
    pub fn total_count(&self, player: &PlayerId) -> usize {
        self.entries.values().filter(|e| &e.player == player).count()
    }

    /// Prompts the player sent earlier in the same round, oldest first.
    pub fn context_before(&self, id: &EntryId) -> Vec<String> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        self.entries(&entry.player, entry.round)
            .filter(|e| e.sequence < entry.sequence)
            .map(|e| e.prompt.clone())
            .collect()
    }

    /// Forget every entry of a player, used when the player leaves the lobby.
    pub fn forget_player(&mut self, player: &PlayerId) {
        self.entries.retain(|_, e| &e.player != player);
        let entries = &self.entries;
        self.prompts.retain(|_, id| entries.contains_key(id));
    }

    /// Drop every entry. Identifiers keep increasing so stale ones never resolve.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.prompts.clear();
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn image(name: &str) -> GenerationOutcome {
        GenerationOutcome::Image {
            image_ref: format!("/images/{name}.png"),
        }
    }

    fn failure() -> GenerationOutcome {
        GenerationOutcome::Failed {
            error_type: GenerationErrorKind::PolicyViolation,
            message: None,
        }
    }

    #[test]
    fn prompt_id_is_minted_only_for_images() {
        let mut ledger = SubmissionLedger::new();
        let player = Uuid::new_v4();

        let ok = ledger.append(player, 1, "a cat");
        let bad = ledger.append(player, 1, "forbidden");

        let ok_entry = ledger.complete(ok, image("cat")).unwrap().clone();
        let bad_entry = ledger.complete(bad, failure()).unwrap().clone();

        assert!(ok_entry.prompt_id().is_some());
        assert!(bad_entry.prompt_id().is_none());
        assert_eq!(
            bad_entry.error_type(),
            Some(GenerationErrorKind::PolicyViolation)
        );
        assert_eq!(
            ledger.find_by_prompt(ok_entry.prompt_id().unwrap()).map(|e| e.id),
            Some(ok)
        );
    }

    #[test]
    fn completion_happens_once() {
        let mut ledger = SubmissionLedger::new();
        let id = ledger.append(Uuid::new_v4(), 1, "x");
        ledger.complete(id, image("x")).unwrap();
        assert_eq!(
            ledger.complete(id, failure()).unwrap_err(),
            LedgerError::AlreadyCompleted(id)
        );
        assert_eq!(
            ledger.complete(EntryId(999), failure()).unwrap_err(),
            LedgerError::UnknownEntry(EntryId(999))
        );
    }

    #[test]
    fn last_valid_skips_errors_and_pending() {
        let mut ledger = SubmissionLedger::new();
        let player = Uuid::new_v4();
        let first = ledger.append(player, 1, "one");
        let second = ledger.append(player, 1, "two");
        let _pending = ledger.append(player, 1, "three");
        ledger.complete(first, image("one")).unwrap();
        ledger.complete(second, failure()).unwrap();

        assert_eq!(ledger.last_valid(&player, 1).map(|e| e.id), Some(first));
        assert_eq!(ledger.count(&player, 1), 3);
        assert!(ledger.last_valid(&player, 2).is_none());
    }

    #[test]
    fn sequences_are_per_player_and_round() {
        let mut ledger = SubmissionLedger::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        ledger.append(alice, 1, "a1");
        let b1 = ledger.append(bob, 1, "b1");
        let a2 = ledger.append(alice, 1, "a2");
        let a_round2 = ledger.append(alice, 2, "a3");

        assert_eq!(ledger.get(&b1).unwrap().sequence, 1);
        assert_eq!(ledger.get(&a2).unwrap().sequence, 2);
        assert_eq!(ledger.get(&a_round2).unwrap().sequence, 1);
        assert_eq!(ledger.context_before(&a2), vec!["a1".to_string()]);
        assert!(ledger.context_before(&a_round2).is_empty());
    }

    #[test]
    fn errors_lists_failed_entries_only() {
        let mut ledger = SubmissionLedger::new();
        let player = Uuid::new_v4();
        let ok = ledger.append(player, 1, "ok");
        let bad = ledger.append(player, 2, "bad");
        let _pending = ledger.append(player, 2, "later");
        ledger.complete(ok, image("ok")).unwrap();
        ledger.complete(bad, failure()).unwrap();

        let errors: Vec<EntryId> = ledger.errors().map(|e| e.id).collect();
        assert_eq!(errors, vec![bad]);
    }

    #[test]
    fn cleared_prompt_ids_never_resolve_again() {
        let mut ledger = SubmissionLedger::new();
        let player = Uuid::new_v4();
        let id = ledger.append(player, 1, "x");
        let prompt = ledger.complete(id, image("x")).unwrap().prompt_id().unwrap();
        ledger.clear();

        let again = ledger.append(player, 1, "y");
        let fresh = ledger.complete(again, image("y")).unwrap().prompt_id().unwrap();
        assert_ne!(prompt, fresh);
        assert!(ledger.find_by_prompt(prompt).is_none());
    }
}
