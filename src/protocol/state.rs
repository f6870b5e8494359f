use serde::Serialize;

/// Authoritative rig state shared by every transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    #[default]
    Idle,
    Busy,
    Error,
}

impl ProtocolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolState::Idle => "idle",
            ProtocolState::Busy => "busy",
            ProtocolState::Error => "error",
        }
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
