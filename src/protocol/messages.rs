use serde::{Deserialize, Serialize};

/// First message on a new connection
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Setup {
    pub model: String,
}

/// Microphone audio sent to the endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,  // Base64-encoded PCM16 LE bytes
    pub mime_type: String,
}

/// Any message received from the endpoint.
///
/// Every field is optional; unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// `{}` from the service, `true` from some proxies
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,  // Base64-encoded PCM16 LE bytes, 24kHz mono
    #[serde(default)]
    pub mime_type: Option<String>,
}
