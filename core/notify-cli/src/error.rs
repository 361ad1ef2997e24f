use seller_notify_core::NotifyError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] NotifyError),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Relay error: {code}: {message}")]
    Relay { code: String, message: String },

    #[error("Unexpected relay reply: {0}")]
    UnexpectedReply(String),

    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Notification channel closed: {0}")]
    ChannelClosed(String),
}

impl CliError {
    pub fn io(context: &str, source: std::io::Error) -> Self {
        CliError::Io {
            context: context.to_string(),
            source,
        }
    }
}
