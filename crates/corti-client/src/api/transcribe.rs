//! Transcription stream API.

use crate::api::StreamConnector;
use crate::client::CortiClient;

/// Stateless dictation-style transcription at `{wss}/transcribe`.
pub struct TranscribeApi {
    client: CortiClient,
}

impl TranscribeApi {
    pub(crate) fn new(client: CortiClient) -> Self {
        Self { client }
    }
}

impl StreamConnector for TranscribeApi {
    fn client(&self) -> &CortiClient {
        &self.client
    }

    fn path(&self) -> String {
        "transcribe".to_string()
    }
}
