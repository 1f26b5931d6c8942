//! Built-in named replay episodes.

use crate::runner::ReplayEpisode;
use medworld_core::NoiseProfile;

/// Episode identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeId {
    /// EP-001: ST elevation on the first ECG forces the emergency pathway
    StElevation,

    /// EP-002: Pneumonia work-up with CBC and chest X-ray
    Pneumonia,

    /// EP-003: Appendicitis confirmed on ultrasound
    Appendicitis,

    /// EP-004: Lower urinary tract infection without urosepsis
    Cystitis,

    /// EP-005: Stroke with a high NIHSS score escalates mid work-up
    Stroke,
}

impl EpisodeId {
    /// Returns every built-in episode.
    pub fn all() -> Vec<EpisodeId> {
        vec![
            EpisodeId::StElevation,
            EpisodeId::Pneumonia,
            EpisodeId::Appendicitis,
            EpisodeId::Cystitis,
            EpisodeId::Stroke,
        ]
    }

    /// Returns the episode name.
    pub fn name(&self) -> &'static str {
        match self {
            EpisodeId::StElevation => "st_elevation",
            EpisodeId::Pneumonia => "pneumonia",
            EpisodeId::Appendicitis => "appendicitis",
            EpisodeId::Cystitis => "cystitis",
            EpisodeId::Stroke => "stroke",
        }
    }

    /// Returns a description of the episode.
    pub fn description(&self) -> &'static str {
        match self {
            EpisodeId::StElevation => "chest_pain_001: ECG shows ST elevation, turn 1 must escalate",
            EpisodeId::Pneumonia => "resp_001: history, CBC and chest X-ray support pneumonia",
            EpisodeId::Appendicitis => "abd_001: migrating pain and ultrasound support appendicitis",
            EpisodeId::Cystitis => "uti_001: urinalysis and culture without flank pain",
            EpisodeId::Stroke => "stroke_001: NIHSS of 9 trips the override after head CT",
        }
    }

    /// Returns the case the episode is bound to.
    pub fn case_id(&self) -> &'static str {
        match self {
            EpisodeId::StElevation => "chest_pain_001",
            EpisodeId::Pneumonia => "resp_001",
            EpisodeId::Appendicitis => "abd_001",
            EpisodeId::Cystitis => "uti_001",
            EpisodeId::Stroke => "stroke_001",
        }
    }

    /// Builds the scripted episode.
    pub fn episode(&self, seed: u64, noise: NoiseProfile) -> ReplayEpisode {
        let base = ReplayEpisode::new(self.name(), self.case_id(), seed).with_noise(noise);
        match self {
            EpisodeId::StElevation => base.order("ecg").order("troponin").expect_escalation(),
            EpisodeId::Pneumonia => base
                .ask("onset")
                .order("cbc")
                .order("chest_xray")
                .expect_diagnosis("community-acquired pneumonia"),
            EpisodeId::Appendicitis => base
                .ask("onset")
                .order("abdominal_ultrasound")
                .expect_diagnosis("acute appendicitis"),
            EpisodeId::Cystitis => base
                .ask("flank_pain")
                .order("urinalysis")
                .order("urine_culture")
                .expect_diagnosis("acute lower urinary tract infection"),
            EpisodeId::Stroke => base.order("head_ct").order("nihss").expect_escalation(),
        }
    }
}

/// Builds the full built-in suite under one seed.
pub fn builtin_suite(seed: u64, noise: &NoiseProfile) -> Vec<ReplayEpisode> {
    EpisodeId::all()
        .iter()
        .map(|id| id.episode(seed, noise.clone()))
        .collect()
}

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for EpisodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "st_elevation" | "stelevation" | "ep-001" => Ok(EpisodeId::StElevation),
            "pneumonia" | "ep-002" => Ok(EpisodeId::Pneumonia),
            "appendicitis" | "ep-003" => Ok(EpisodeId::Appendicitis),
            "cystitis" | "uti" | "ep-004" => Ok(EpisodeId::Cystitis),
            "stroke" | "ep-005" => Ok(EpisodeId::Stroke),
            _ => Err(format!("Unknown episode: {}", s)),
        }
    }
}
