//! Display state shown to the user.
//!
//! Derived from the coarse conversation state together with the two local
//! speech-activity flags. Live speech on either side takes precedence over
//! whatever the protocol reports, so the indicator reacts immediately.

use crate::conversation::ConversationState;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    UserSpeaking,
    AgentSpeaking,
    Listening,
    Thinking,
    Speaking,
    #[default]
    Waiting,
}

/// An sRGB indicator color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const USER_SPEECH_COLOR: Rgb = Rgb(88, 206, 118);
pub const AGENT_SPEECH_COLOR: Rgb = Rgb(153, 128, 250);
pub const THINKING_COLOR: Rgb = Rgb(230, 159, 251);
pub const RESTING_COLOR: Rgb = Rgb(191, 191, 191);

impl DisplayState {
    pub fn label(self) -> &'static str {
        match self {
            Self::UserSpeaking => "Listening...",
            Self::AgentSpeaking => "Speaking...",
            Self::Listening => "Listening",
            Self::Thinking => "Thinking",
            Self::Speaking => "Speaking",
            Self::Waiting => "Waiting",
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Self::UserSpeaking => USER_SPEECH_COLOR,
            Self::AgentSpeaking => AGENT_SPEECH_COLOR,
            Self::Thinking => THINKING_COLOR,
            Self::Listening | Self::Speaking | Self::Waiting => RESTING_COLOR,
        }
    }
}

pub fn display_state(
    coarse: ConversationState,
    is_user_speaking: bool,
    is_agent_speaking: bool,
) -> DisplayState {
    if is_user_speaking {
        return DisplayState::UserSpeaking;
    }
    if is_agent_speaking {
        return DisplayState::AgentSpeaking;
    }
    match coarse {
        ConversationState::Listening => DisplayState::Listening,
        ConversationState::Thinking => DisplayState::Thinking,
        ConversationState::Speaking => DisplayState::Speaking,
        ConversationState::Idle => DisplayState::Waiting,
    }
}
