pub mod error;
pub mod frame_extractor;
pub mod scene_segmenter;
pub mod caption_index;
pub mod matcher;
pub mod transcript;
pub mod collage;
pub mod providers;
pub mod prompt;
pub mod session;
pub mod video_fetcher;
pub mod config;

pub use error::{Result, SearchError};
pub use frame_extractor::{FfmpegOpener, FrameExtractor, FrameSource, FrameSourceOpener, VideoInfo};
pub use scene_segmenter::{segment, Scene, SegmentOutput};
pub use caption_index::{build_or_load, CaptionIndex, Captioner};
pub use matcher::{normalize, search};
pub use transcript::{search_transcript, JobState, TranscriptHit, TranscriptJob, Transcriber};
pub use collage::{compose, CollageLayout};
pub use providers::{create_captioner, create_transcriber, CaptionProvider, GeminiClient, OllamaCaptioner};
pub use prompt::{LinePrompt, RustylinePrompt};
pub use session::{SearchMode, Session};
pub use video_fetcher::VideoFetcher;
pub use config::{CliOverrides, ConfigLoader, SearchConfig};
