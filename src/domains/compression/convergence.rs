//! In-process size convergence loop.
//!
//! Every iteration reloads a fresh document from the previous iteration's
//! bytes, applies one transform pass and measures the result. The smallest
//! output seen is what the caller gets back.

use lopdf::Document;

use crate::errors::{DomainError, DomainResult};
use super::transform::{PageTransformEngine, TransformPlan};
use super::types::{CancellationFlag, CompressionProfile};

pub const MAX_ITERATIONS: u32 = 8;

/// Scale used by escalation iteration `n` is `ESCALATION_SCALES[n - 2]`.
/// Within `MAX_ITERATIONS` the last pass uses 0.35; the final 0.3 only
/// matters as the clamp value, and the tie-breaker reaches below it.
pub const ESCALATION_SCALES: [f32; 8] = [0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.35, 0.3];

/// Multiplier on the iteration scale for the rescale tried when an
/// iteration fails to shrink the document.
pub const TIE_BREAKER_FACTOR: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct ConvergenceOutcome {
    pub bytes: Vec<u8>,
    /// Passes that produced bytes, the first one included
    pub iterations: u32,
    /// Escalations that did not shrink and fell back to the uniform rescale
    pub tie_breaks: u32,
    pub target_reached: bool,
}

/// Scale for a 1-based iteration number
pub fn iteration_scale(iteration: u32, profile: &CompressionProfile) -> f32 {
    if iteration <= 1 {
        return profile.scale;
    }
    let index = ((iteration - 2) as usize).min(ESCALATION_SCALES.len() - 1);
    ESCALATION_SCALES[index]
}

/// Always more aggressive than the escalation step it replaces
pub fn tie_breaker_scale(iteration_scale: f32) -> f32 {
    iteration_scale * TIE_BREAKER_FACTOR
}

fn transform_and_save(doc: &mut Document, plan: &TransformPlan) -> DomainResult<Vec<u8>> {
    let report = PageTransformEngine::apply(doc, plan);
    log::debug!(
        "pass at scale {:.2}: {} pages scaled, {} images recompressed, {} objects pruned, {} step failures",
        plan.scale,
        report.pages_scaled,
        report.images_recompressed,
        report.objects_pruned,
        report.failures.len()
    );

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| DomainError::transform_step("serialize", e))?;
    Ok(bytes)
}

fn reload_and_transform(source: &[u8], plan: &TransformPlan) -> DomainResult<Vec<u8>> {
    let mut doc = Document::load_mem(source).map_err(|e| DomainError::transform_step("reload", e))?;
    transform_and_save(&mut doc, plan)
}

/// Metadata-only pass over bytes that already meet their target
pub fn strip_metadata_only(bytes: &[u8]) -> DomainResult<Vec<u8>> {
    let mut doc = Document::load_mem(bytes).map_err(|e| DomainError::transform_step("reload", e))?;
    let report = PageTransformEngine::strip_metadata(&mut doc);
    log::debug!("metadata-only pass: {} step failures", report.failures.len());

    let mut stripped = Vec::new();
    doc.save_to(&mut stripped)
        .map_err(|e| DomainError::transform_step("serialize", e))?;
    Ok(stripped)
}

/// Shrink `seed` toward the profile target.
///
/// Only a failure to load `seed` itself is returned as an error; later
/// iteration failures end the loop with the best bytes produced so far.
pub fn run_in_process(
    seed: &[u8],
    profile: &CompressionProfile,
    cancel: &CancellationFlag,
) -> DomainResult<ConvergenceOutcome> {
    cancel.check()?;

    let base_plan = TransformPlan::from_profile(profile);
    let mut doc = Document::load_mem(seed)
        .map_err(|e| DomainError::InputRead(format!("not a readable PDF: {}", e)))?;

    let first = match transform_and_save(&mut doc, &base_plan) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("first pass failed, keeping input bytes: {}", e);
            seed.to_vec()
        }
    };
    drop(doc);

    escalate(seed, first, profile, cancel, reload_and_transform)
}

/// Escalation passes after the first. `pass` reloads and transforms the
/// previous pass's bytes under the given plan.
fn escalate<F>(
    seed: &[u8],
    first: Vec<u8>,
    profile: &CompressionProfile,
    cancel: &CancellationFlag,
    mut pass: F,
) -> DomainResult<ConvergenceOutcome>
where
    F: FnMut(&[u8], &TransformPlan) -> DomainResult<Vec<u8>>,
{
    let target = profile.target_size_bytes();
    let base_plan = TransformPlan::from_profile(profile);

    let mut iterations = 1;
    let mut tie_breaks = 0;
    let mut previous = first;
    let mut best = if previous.len() < seed.len() { previous.clone() } else { seed.to_vec() };
    log::debug!("iteration 1: {} -> {} bytes (target {})", seed.len(), previous.len(), target);

    while best.len() as u64 > target && iterations < MAX_ITERATIONS {
        cancel.check()?;
        let iteration = iterations + 1;

        let plan = base_plan.with_scale(iteration_scale(iteration, profile));
        let mut candidate = match pass(&previous, &plan) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("iteration {} failed, keeping best so far: {}", iteration, e);
                break;
            }
        };
        iterations = iteration;

        if candidate.len() >= previous.len() {
            tie_breaks += 1;
            let rescale = plan.with_scale(tie_breaker_scale(plan.scale));
            log::debug!(
                "iteration {} did not shrink, trying uniform rescale at {:.2}",
                iteration,
                rescale.scale
            );
            cancel.check()?;
            match pass(&previous, &rescale) {
                Ok(rescaled) if rescaled.len() < candidate.len() => candidate = rescaled,
                Ok(_) => {}
                Err(e) => log::warn!("uniform rescale failed: {}", e),
            }
        }

        log::debug!(
            "iteration {} at scale {:.2}: {} bytes (target {})",
            iteration,
            plan.scale,
            candidate.len(),
            target
        );

        if candidate.len() < best.len() {
            best = candidate.clone();
        }
        previous = candidate;
    }

    Ok(ConvergenceOutcome {
        target_reached: best.len() as u64 <= target,
        bytes: best,
        iterations,
        tie_breaks,
    })
}
