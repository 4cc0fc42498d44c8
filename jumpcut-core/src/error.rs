use thiserror::Error;

/// All errors produced by jumpcut-core.
#[derive(Debug, Error)]
pub enum JumpCutError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("media source error: {0}")]
    MediaSource(String),

    #[error("the playback engine cannot provide a mirror source: {0}")]
    MirrorUnavailable(String),

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    #[error("shadow pipeline error: {0}")]
    Shadow(String),

    #[error("pipeline is already stopped")]
    PipelineStopped,

    #[error("controller is already initialised")]
    AlreadyInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, JumpCutError>;
