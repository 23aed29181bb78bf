//! Per-item algorithm: short-circuits first, then the remote retry loop

use super::RunContext;
use crate::credential_pool::{Acquisition, CredentialHealth, CredentialLease, CredentialPool};
use crate::error::{CondenseError, StoreError};
use crate::types::{CredentialId, DispatchOutcome, DocumentRef, Event, OutcomeTag};
use crate::utils::{char_len, failure_placeholder, is_blank};
use std::time::Instant;

/// Failure reason recorded when the pool runs dry mid-item
const EXHAUSTED_REASON: &str = "credentials exhausted";

/// Run one document through the pipeline
///
/// Never fails: store errors after the halt check are converted into an
/// [`OutcomeTag::Error`] outcome.
pub(super) async fn process_item(ctx: &RunContext<'_>, doc: &DocumentRef) -> DispatchOutcome {
    let start = Instant::now();
    match condense_document(ctx, doc, start).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(document = %doc, error = %e, "Item failed with store error");
            DispatchOutcome::failure(OutcomeTag::Error, start.elapsed(), 0, 0, e.to_string())
        }
    }
}

async fn condense_document(
    ctx: &RunContext<'_>,
    doc: &DocumentRef,
    start: Instant,
) -> Result<DispatchOutcome, StoreError> {
    let store = ctx.dispatcher.store.as_ref();
    let config = ctx.dispatcher.config.as_ref();

    if !ctx.force {
        if store.existing_output_valid(doc, &config.quality).await? {
            tracing::info!(document = %doc, "Valid output exists, skipping");
            return Ok(DispatchOutcome::completed(
                OutcomeTag::Skipped,
                start.elapsed(),
                0,
                0,
                0,
            ));
        }
        store.discard_output(doc).await?;
    }

    let content = match store.read(doc).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(document = %doc, error = %e, "Failed to read document");
            return Ok(DispatchOutcome::failure(
                OutcomeTag::Error,
                start.elapsed(),
                0,
                0,
                e.to_string(),
            ));
        }
    };

    if is_blank(&content) {
        tracing::warn!(document = %doc, "Document is empty");
        return Ok(DispatchOutcome::failure(
            OutcomeTag::Empty,
            start.elapsed(),
            0,
            0,
            "empty content",
        ));
    }

    let original_chars = char_len(&content);

    if !ctx.force {
        if let Some(cached) = store.cached_result(doc, &content).await? {
            store.persist(doc, &cached).await?;
            tracing::info!(document = %doc, "Served from cache");
            return Ok(DispatchOutcome::completed(
                OutcomeTag::SuccessCached,
                start.elapsed(),
                original_chars,
                char_len(&cached),
                0,
            ));
        }
    }

    if store.is_listing_document(&content) {
        store.persist(doc, &content).await?;
        tracing::info!(document = %doc, "Listing document saved unchanged");
        return Ok(DispatchOutcome::completed(
            OutcomeTag::SuccessDirectory,
            start.elapsed(),
            original_chars,
            original_chars,
            0,
        ));
    }

    if original_chars < config.min_content_chars {
        store.persist(doc, &content).await?;
        tracing::info!(document = %doc, chars = original_chars, "Short document saved unchanged");
        return Ok(DispatchOutcome::completed(
            OutcomeTag::SuccessShort,
            start.elapsed(),
            original_chars,
            original_chars,
            0,
        ));
    }

    condense_remotely(ctx, doc, &content, start).await
}

async fn condense_remotely(
    ctx: &RunContext<'_>,
    doc: &DocumentRef,
    content: &str,
    start: Instant,
) -> Result<DispatchOutcome, StoreError> {
    let dispatcher = ctx.dispatcher;
    let pool = dispatcher.pool.as_ref();
    let store = dispatcher.store.as_ref();
    let original_chars = char_len(content);

    let mut tried: Vec<CredentialId> = Vec::new();
    let mut attempts = 0u32;
    let mut last_error: Option<CondenseError> = None;
    let mut exhausted = false;

    for attempt in 1..=dispatcher.config.max_attempts {
        let preferred = if attempt == 1 { ctx.preferred } else { None };
        let Some(lease) = paced_lease(pool, preferred, &mut tried, doc).await else {
            exhausted = true;
            ctx.trip_exhausted();
            break;
        };

        attempts += 1;
        tracing::debug!(document = %doc, credential = %lease.id, attempt, "Calling condenser");

        let error = match dispatcher.condenser.condense(content, &lease).await {
            Ok(result) if !is_blank(&result) => {
                pool.report_success(lease.id);
                store.persist(doc, &result).await?;
                if let Err(e) = store.write_cache(doc, content, &result).await {
                    tracing::warn!(document = %doc, error = %e, "Failed to write cache entry");
                }
                let result_chars = char_len(&result);
                tracing::info!(
                    document = %doc,
                    credential = %lease.id,
                    attempt,
                    original_chars,
                    result_chars,
                    "Condensed"
                );
                return Ok(DispatchOutcome::completed(
                    OutcomeTag::Success,
                    start.elapsed(),
                    original_chars,
                    result_chars,
                    attempts,
                ));
            }
            Ok(_) => CondenseError::EmptyResponse,
            Err(e) => e,
        };

        tracing::warn!(
            document = %doc,
            credential = %lease.id,
            attempt,
            code = error.code(),
            error = %error,
            "Condense attempt failed"
        );
        if let CredentialHealth::JustSkipped { errors } = pool.report_error(lease.id) {
            dispatcher.emit_event(Event::CredentialSkipped {
                credential: lease.id,
                errors,
            });
        }
        last_error = Some(error);
    }

    if !exhausted && pool.all_exhausted() {
        exhausted = true;
        ctx.trip_exhausted();
    }

    let reason = match (&last_error, exhausted) {
        (_, true) => EXHAUSTED_REASON.to_string(),
        (Some(e), false) => format!("all {attempts} attempt(s) failed, last error: {e}"),
        (None, false) => "no attempts made".to_string(),
    };
    tracing::error!(document = %doc, attempts, reason = %reason, "Item failed");

    let name = doc.file_name().unwrap_or("document");
    let placeholder = failure_placeholder(name, &reason, chrono::Local::now());
    if let Err(e) = store.persist(doc, &placeholder).await {
        tracing::warn!(document = %doc, error = %e, "Failed to write failure placeholder");
    }

    Ok(DispatchOutcome::failure(
        OutcomeTag::Failed,
        start.elapsed(),
        original_chars,
        attempts,
        reason,
    ))
}

/// Lease a credential and wait for its pacing slot
///
/// Credentials skipped by other workers during the wait are dropped and a new
/// one leased. Returns `None` once the pool is exhausted.
async fn paced_lease(
    pool: &CredentialPool,
    mut preferred: Option<CredentialId>,
    tried: &mut Vec<CredentialId>,
    doc: &DocumentRef,
) -> Option<CredentialLease> {
    loop {
        let lease = match pool.acquire(preferred.take(), tried) {
            Acquisition::Granted(lease) => lease,
            Acquisition::Exhausted => return None,
        };
        tried.push(lease.id);

        lease.wait_for_slot().await;
        if pool.all_exhausted() {
            return None;
        }
        if !pool.is_skipped(lease.id) {
            return Some(lease);
        }
        tracing::debug!(
            document = %doc,
            credential = %lease.id,
            "Credential skipped while waiting for its slot"
        );
    }
}
