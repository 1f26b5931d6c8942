//! Static in-memory guideline index.
//!
//! Scores each document by how many query terms appear in its title, tags
//! and content, keeps the best `top_k` and normalizes scores against the
//! best hit.

use crate::error::ClinicalError;
use async_trait::async_trait;
use medworld_env::{EnvError, GuidelineEvidence, KnowledgeRetriever};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One guideline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineDoc {
    pub guideline_id: String,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
}

impl GuidelineDoc {
    fn new(guideline_id: &str, title: &str, source: &str, tags: &[&str], content: &str) -> Self {
        Self {
            guideline_id: guideline_id.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content: content.to_string(),
        }
    }

    fn terms(&self) -> BTreeSet<String> {
        tokenize(&format!("{} {} {}", self.title, self.tags.join(" "), self.content))
    }
}

/// Retriever over a fixed document list.
#[derive(Debug, Clone)]
pub struct StaticGuidelineIndex {
    docs: Vec<(GuidelineDoc, BTreeSet<String>)>,
}

impl StaticGuidelineIndex {
    pub fn new(docs: Vec<GuidelineDoc>) -> Self {
        Self {
            docs: docs
                .into_iter()
                .map(|doc| {
                    let terms = doc.terms();
                    (doc, terms)
                })
                .collect(),
        }
    }

    /// Five summaries matching the built-in cases.
    pub fn builtin() -> Self {
        Self::new(vec![
            GuidelineDoc::new(
                "acs-001",
                "Acute coronary syndrome emergency pathway",
                "AHA/ESC chest pain pathway (summary)",
                &["chest pain", "myocardial infarction", "ecg", "troponin", "reperfusion"],
                "Suspected acute coronary syndrome needs a 12-lead ECG immediately, serial troponin, \
                 and rapid assessment for reperfusion therapy.",
            ),
            GuidelineDoc::new(
                "cap-001",
                "Community-acquired pneumonia in the emergency department",
                "ATS/IDSA CAP guideline (summary)",
                &["pneumonia", "cough", "fever", "chest x-ray", "antibiotics"],
                "Combine chest imaging with inflammatory markers, start empiric antibiotics early \
                 and assess the need for admission.",
            ),
            GuidelineDoc::new(
                "app-001",
                "Acute appendicitis assessment and surgical referral",
                "WSES appendicitis guideline (summary)",
                &["appendicitis", "right lower quadrant", "ultrasound", "surgery"],
                "Migratory right lower quadrant pain with raised inflammatory markers warrants prompt \
                 imaging and surgical consultation.",
            ),
            GuidelineDoc::new(
                "uti-001",
                "Acute lower urinary tract infection",
                "EAU UTI guideline (summary)",
                &["urinary tract infection", "dysuria", "frequency", "urinalysis", "urine culture"],
                "Use urinalysis and, where indicated, urine culture; tailor antibiotics to resistance \
                 risk and culture results.",
            ),
            GuidelineDoc::new(
                "stroke-001",
                "Acute ischemic stroke fast track",
                "AHA/ASA stroke guideline (summary)",
                &["stroke", "slurred speech", "weakness", "head ct", "reperfusion"],
                "Suspected acute stroke needs an immediate neurological score and brain imaging to \
                 exclude hemorrhage, then assessment of the reperfusion window.",
            ),
        ])
    }

    /// Loads a JSON array of documents. Entries missing an id, title, source
    /// or content are skipped.
    pub fn from_json(json: &str) -> Result<Self, ClinicalError> {
        let docs: Vec<GuidelineDoc> =
            serde_json::from_str(json).map_err(|e| ClinicalError::catalog(format!("guideline corpus: {}", e)))?;
        let docs = docs
            .into_iter()
            .filter(|d| {
                [&d.guideline_id, &d.title, &d.source, &d.content]
                    .iter()
                    .all(|field| !field.trim().is_empty())
            })
            .collect();
        Ok(Self::new(docs))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Synchronous ranking used by the async retriever impl.
    pub fn rank(&self, query: &str, top_k: usize) -> Vec<GuidelineEvidence> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &GuidelineDoc)> = self
            .docs
            .iter()
            .map(|(doc, bag)| (terms.iter().filter(|t| bag.contains(*t)).count(), doc))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable: equal scores keep corpus order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(top_k.max(1));

        let best = scored.first().map(|(s, _)| *s).unwrap_or(1).max(1);
        scored
            .into_iter()
            .map(|(score, doc)| GuidelineEvidence {
                guideline_id: doc.guideline_id.clone(),
                title: doc.title.clone(),
                source: doc.source.clone(),
                score: (score as f64 / best as f64 * 1000.0).round() / 1000.0,
            })
            .collect()
    }
}

#[async_trait]
impl KnowledgeRetriever for StaticGuidelineIndex {
    async fn rank_evidence(
        &self,
        diagnosis_label: &str,
        top_k: usize,
    ) -> Result<Vec<GuidelineEvidence>, EnvError> {
        Ok(self.rank(diagnosis_label, top_k))
    }
}

/// Lowercased alphanumeric terms.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
