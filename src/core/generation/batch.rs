//! Batch card generation
//!
//! One call produces up to a batch quota of new cards: a free-form text
//! completion in the card template, a structured conversion to JSON, and
//! bounded continuation rounds when the yield is short.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ColorTargets, RarityQuota};
use crate::core::card::Card;
use crate::core::llm::{GenerationParams, ModelKey, StructuredGenerator, TextGenerator};

use super::balance::BalanceReport;
use super::error::{PipelineError, Result};
use super::inspiration::InspirationCard;
use super::numbering::CollectorNumbering;
use super::retry::{retry, RetryError, RetryPolicy};
use super::templates::{self, BatchPromptContext};

/// Stateless batch generator; accumulated cards and numbering are passed in.
pub struct BatchGenerator {
    text: Arc<dyn TextGenerator>,
    structured: Arc<dyn StructuredGenerator>,
    quota: RarityQuota,
    targets: ColorTargets,
    continuation_rounds: u32,
    policy: RetryPolicy,
}

impl BatchGenerator {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        structured: Arc<dyn StructuredGenerator>,
        quota: RarityQuota,
        targets: ColorTargets,
    ) -> Self {
        Self {
            text,
            structured,
            quota,
            targets,
            continuation_rounds: 1,
            policy: RetryPolicy::fixed(3, 5),
        }
    }

    /// Retry policy for the batch and continuation text requests.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_continuation_rounds(mut self, rounds: u32) -> Self {
        self.continuation_rounds = rounds;
        self
    }

    pub fn quota(&self) -> RarityQuota {
        self.quota
    }

    /// Generate one batch against the cards accepted so far.
    ///
    /// Returned cards are numbered from `numbering` in the order produced.
    /// A shortfall is logged, never an error.
    pub async fn generate_batch(
        &self,
        batch_no: u32,
        theme: &str,
        inspiration: &[InspirationCard],
        accumulated: &[Card],
        numbering: &mut CollectorNumbering,
        cancel: &CancellationToken,
    ) -> Result<Vec<Card>> {
        let quota = self.quota.total() as usize;
        let report = BalanceReport::new(accumulated, &self.targets);
        tracing::debug!(
            batch = batch_no,
            priority = ?report.priority_colors(),
            over = ?report.over_represented(),
            "colour balance before batch"
        );

        let prompt = templates::batch_prompt(&BatchPromptContext {
            inspiration,
            theme,
            existing: accumulated,
            report: &report,
            targets: &self.targets,
            quota: self.quota,
        });

        let text = &self.text;
        let params = GenerationParams::default();
        let (prompt_ref, params_ref) = (prompt.as_str(), &params);

        let label = format!("batch {batch_no} request");
        let response = match retry(&self.policy, cancel, &label, move |_| {
            text.generate(prompt_ref, None, ModelKey::Main, params_ref)
        })
        .await
        {
            Ok(reply) => reply,
            Err(RetryError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(RetryError::Exhausted { last, .. }) => return Err(last.into()),
        };

        let mut cards = match self.parse_cards(&response, cancel).await {
            Ok(cards) => cards,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::error!(batch = batch_no, error = %e, "could not parse batch response");
                Vec::new()
            }
        };
        tracing::info!(batch = batch_no, parsed = cards.len(), quota, "parsed batch response");

        let mut prior = response;
        for round in 1..=self.continuation_rounds {
            if cards.len() >= quota {
                break;
            }
            let missing = quota - cards.len();
            tracing::info!(batch = batch_no, round, missing, "requesting continuation");

            let follow_up = templates::continuation_prompt(missing);
            let label = format!("batch {batch_no} continuation {round}");
            let (prior_ref, follow_up_ref) = (prior.as_str(), follow_up.as_str());
            let continued = match retry(&self.policy, cancel, &label, move |_| {
                text.continue_conversation(prompt_ref, prior_ref, follow_up_ref, ModelKey::Main, params_ref)
            })
            .await
            {
                Ok(reply) => reply,
                Err(RetryError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(RetryError::Exhausted { attempts, last }) => {
                    tracing::error!(batch = batch_no, round, attempts, error = %last, "continuation request failed");
                    break;
                }
            };

            match self.parse_cards(&continued, cancel).await {
                Ok(more) => {
                    tracing::info!(batch = batch_no, round, added = more.len(), "continuation parsed");
                    cards.extend(more);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::error!(batch = batch_no, round, error = %e, "continuation failed");
                }
            }
            prior = continued;
        }

        cards.truncate(quota);
        if cards.len() != quota {
            tracing::warn!(batch = batch_no, produced = cards.len(), quota, "batch yield short of quota");
        }

        numbering.assign(&mut cards);
        Ok(cards)
    }

    /// Convert the card-template text to card records.
    ///
    /// Entries that do not deserialize as cards are skipped.
    async fn parse_cards(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Card>> {
        let prompt = templates::text_to_json_prompt(text);
        let value = self
            .cancellable(
                cancel,
                self.structured.generate_structured(
                    &prompt,
                    Some(templates::JSON_CONVERTER_SYSTEM_PROMPT),
                    ModelKey::Json,
                    &GenerationParams::default(),
                ),
            )
            .await?;

        let entries = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("cards") {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            },
            _ => Vec::new(),
        };

        let mut cards = Vec::with_capacity(entries.len());
        for entry in entries {
            match Card::from_generated(entry) {
                Ok(card) => cards.push(card),
                Err(e) => tracing::warn!(error = %e, "skipping unparseable card entry"),
            }
        }
        Ok(cards)
    }

    async fn cancellable<T>(
        &self,
        cancel: &CancellationToken,
        call: impl std::future::Future<Output = crate::core::llm::Result<T>>,
    ) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            out = call => Ok(out?),
        }
    }
}
