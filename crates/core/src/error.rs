use wanda_realtime_types::CodecError;

/// A session could not be established. Whatever had been opened for the
/// attempt has already been released when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("credential exchange failed: {0:#}")]
    Credential(#[source] anyhow::Error),
    #[error("peer connection negotiation failed: {0:#}")]
    Negotiation(#[source] anyhow::Error),
    #[error("microphone acquisition failed: {0:#}")]
    Microphone(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("no open side channel, dropped `{event_type}`")]
pub struct ChannelUnavailable {
    pub event_type: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    ChannelUnavailable(#[from] ChannelUnavailable),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("side channel rejected `{event_type}`: {source:#}")]
    Transport {
        event_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
