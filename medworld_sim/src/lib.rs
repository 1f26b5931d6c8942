//! MedWorld Replay Evaluation Harness
//!
//! Drives scripted clinical encounters through the orchestrator under fixed
//! seeds and scores the outcome against ground truth.
//!
//! # Core Principle: Replays Are Reproducible
//!
//! Every source of variation is pinned by the episode:
//! - **Case**: bound once, read from the shared catalog
//! - **Noise**: one ChaCha8 stream per session, seeded by the episode
//! - **Script**: tool calls issued in order, bypassing free-text triage
//!
//! Running an episode twice yields identical records, and a concurrent batch
//! reports exactly what a sequential one does.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ReplayRunner                          │
//! │                                                             │
//! │  ReplayEpisode ──► Orchestrator ──► Session + WorldModel    │
//! │   (case, seed,      (fresh per        (seeded probes,       │
//! │    noise, script)    episode)          sticky override)     │
//! │        │                                     │              │
//! │        │                 Vec<Turn> ◄─────────┘              │
//! │        ▼                     │                              │
//! │  ExpectedOutcome ──────► EpisodeRecord                      │
//! │                              │                              │
//! │                   ┌──────────▼──────────┐                   │
//! │                   │ MetricsAccumulator  │ (atomic sums)     │
//! │                   └──────────┬──────────┘                   │
//! └──────────────────────────────┼──────────────────────────────┘
//!                                ▼
//!              QualityThresholds ──► ReportWriter
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use medworld_sim::{builtin_suite, ReplayRunner};
//! use medworld_core::{CaseCatalog, NoiseProfile};
//!
//! let runner = ReplayRunner::new(Arc::new(CaseCatalog::builtin()?));
//! let report = runner.run_batch(&builtin_suite(42, &NoiseProfile::none())).await;
//! println!("accuracy = {:.2}", report.metrics.diagnosis_accuracy);
//! ```

mod aggregate;
mod batch;
mod config;
mod error;
mod exporter;
mod gate;
mod runner;
pub mod episodes;

pub use aggregate::{MetricsAccumulator, ReplayMetrics, ReplayReport};
pub use batch::generate_batch;
pub use config::ReplayConfig;
pub use episodes::{builtin_suite, EpisodeId};
pub use error::EvalError;
pub use exporter::{JsonReportWriter, ReplayExport, ReportWriter};
pub use gate::{GateOutcome, QualityThresholds};
pub use runner::{probe_call, EpisodeRecord, EpisodeStatus, ExpectedOutcome, ReplayEpisode, ReplayRunner};
