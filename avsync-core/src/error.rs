use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render thread failed to start: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Renderer has been released")]
    Released,
    #[error("Render thread is gone")]
    Disconnected,
    #[error("Invalid renderer config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Why an audio sink refused a buffer. Never fatal to the scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Audio queue full ({depth} buffers)")]
    QueueFull { depth: usize },
    #[error("Audio sink rejected buffer: {0}")]
    Rejected(String),
    #[error("Audio device error: {0}")]
    Device(String),
}
