//! # Scribe Core — Segmentation and Parallel Transcription Pipeline
//!
//! Splits an audio buffer into indexed chunks, fans each chunk out to a
//! remote speech recognizer through a bounded worker pool, and reassembles
//! the transcripts in original order despite calls completing out of order.
//!
//! ## Data flow
//!
//! ```text
//! raw bytes → Segmenter → ordered chunks → Dispatcher (bounded fan-out)
//!                                              ↓ per-index transcripts
//!                                          Assembler → final transcript
//! ```
//!
//! The recognizer and the optional staging store are trait objects injected
//! into the [`Dispatcher`]; construct them once at process start (see
//! [`create_best_recognizer`]) and share them across requests.

pub mod assembler;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod recognizer;
pub mod segmenter;
pub mod staging;

pub use assembler::assemble;
pub use config::ScribeConfig;
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{ScribeError, ScribeResult};
pub use recognizer::{
    create_best_recognizer, AudioEncoding, AudioSource, FixedRecognizer, GoogleSpeech,
    RecognizeRequest, Recognizer,
};
pub use segmenter::{segment, Chunk, SegmentPolicy};
pub use staging::{GcsStore, StagedArtifact, StagingStore};
