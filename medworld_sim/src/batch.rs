//! Seeded generation of pathway-following episodes.

use crate::runner::{probe_call, ReplayEpisode};
use medworld_core::{CaseCatalog, NoiseProfile, ProbeRef, SafetyEvaluator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

/// Generates `count` episodes over the catalog.
///
/// Cases are drawn with a ChaCha8 stream seeded by `seed`; episode `i` runs
/// under `seed + i`. Each script issues the case's pathway probes in
/// template order, then `recommend_plan`. The expected outcome comes from
/// ground truth: escalation when a red flag holds over the scripted probes,
/// otherwise the case's true diagnosis.
pub fn generate_batch(catalog: &CaseCatalog, seed: u64, count: usize, noise: &NoiseProfile) -> Vec<ReplayEpisode> {
    let case_ids = catalog.case_ids();
    if case_ids.is_empty() {
        return Vec::new();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    (0..count)
        .filter_map(|i| {
            let case_id = &case_ids[rng.gen_range(0..case_ids.len())];
            let case = catalog.get(case_id).ok()?;

            let mut issued = BTreeSet::new();
            let mut episode = ReplayEpisode::new(format!("{}#{}", case_id, i), case_id.as_str(), seed.wrapping_add(i as u64))
                .with_noise(noise.clone());
            for probe in case.pathway.iter().flat_map(|item| item.required_probes.iter()) {
                if issued.insert(ProbeRef::new(probe.kind, &probe.id)) {
                    episode = episode.call(probe_call(probe.kind, &probe.id));
                }
            }

            let episode = if SafetyEvaluator::evaluate(&case, &issued) {
                episode.expect_escalation()
            } else {
                episode.expect_diagnosis(case.true_diagnosis.clone())
            };
            Some(episode)
        })
        .collect()
}
