//! Interaction stream API.

use crate::api::StreamConnector;
use crate::client::CortiClient;

/// Live stream of one interaction at `{wss}/interactions/{id}/streams`.
pub struct StreamsApi {
    client: CortiClient,
    interaction_id: String,
}

impl StreamsApi {
    pub(crate) fn new(client: CortiClient, interaction_id: impl Into<String>) -> Self {
        Self {
            client,
            interaction_id: interaction_id.into(),
        }
    }

    pub fn interaction_id(&self) -> &str {
        &self.interaction_id
    }
}

impl StreamConnector for StreamsApi {
    fn client(&self) -> &CortiClient {
        &self.client
    }

    fn path(&self) -> String {
        format!(
            "interactions/{}/streams",
            urlencoding::encode(&self.interaction_id)
        )
    }
}
