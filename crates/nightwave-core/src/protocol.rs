//! Control-channel wire protocol: one UTF-8 token per connection, no
//! framing, no acknowledgment payload.

/// Commands a second process instance can send to the running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    PlayPause,
    NextStation,
    PrevStation,
}

impl ControlCommand {
    pub fn as_token(&self) -> &'static str {
        match self {
            ControlCommand::PlayPause => "play-pause",
            ControlCommand::NextStation => "next-station",
            ControlCommand::PrevStation => "prev-station",
        }
    }

    /// Parse a received token.  Unknown tokens are rejected, not guessed at.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "play-pause" => Some(ControlCommand::PlayPause),
            "next-station" => Some(ControlCommand::NextStation),
            "prev-station" => Some(ControlCommand::PrevStation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        for cmd in [
            ControlCommand::PlayPause,
            ControlCommand::NextStation,
            ControlCommand::PrevStation,
        ] {
            assert_eq!(ControlCommand::from_token(cmd.as_token()), Some(cmd));
        }
    }

    #[test]
    fn test_unknown_token_rejected() {
        assert_eq!(ControlCommand::from_token("stop"), None);
        assert_eq!(ControlCommand::from_token(""), None);
    }

    #[test]
    fn test_token_trimmed() {
        assert_eq!(
            ControlCommand::from_token("play-pause\n"),
            Some(ControlCommand::PlayPause)
        );
    }
}
