//! Wire vocabulary for the request/response bus.
//!
//! These are the stable request and reply shapes exchanged between worker
//! threads and the owner thread. Any transport may carry them verbatim; the
//! in-process bus in [`crate::bus`] is the default one.

/// Color channel for relayed status text.
///
/// The owner decides how (or whether) to render the color; workers only tag
/// the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageColor {
    #[default]
    Default,
    Red,
    Green,
    Blue,
    Yellow,
}

impl MessageColor {
    /// Stable lowercase name, useful for log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageColor::Default => "default",
            MessageColor::Red => "red",
            MessageColor::Green => "green",
            MessageColor::Blue => "blue",
            MessageColor::Yellow => "yellow",
        }
    }
}

/// Identifies one acquired progress-gauge session.
///
/// Tokens are handed out by the owner on a successful acquire and are unique
/// for the lifetime of the owner loop, so a late request from a stale session
/// is distinguishable from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A request sent by a worker thread to the owner thread.
///
/// One variant per observed wire shape:
/// - [`AcquireGauge`](Request::AcquireGauge): request exclusive use of the
///   shared progress indicator for `total_units` units of work
/// - [`GaugeTick`](Request::GaugeTick): update the visible indicator
/// - [`ReleaseGauge`](Request::ReleaseGauge): free the indicator
/// - [`MissingModels`](Request::MissingModels): ask the user whether to
///   download the named missing model directories
/// - [`Message`](Request::Message): relay log/status text to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AcquireGauge {
        total_units: usize,
    },
    GaugeTick {
        current: usize,
        total: usize,
        label: String,
    },
    ReleaseGauge,
    MissingModels {
        names: Vec<String>,
    },
    Message {
        text: String,
        color: MessageColor,
        timestamp: bool,
    },
}

impl Request {
    /// Short tag for logging, mirroring the wire names.
    pub fn tag(&self) -> &'static str {
        match self {
            Request::AcquireGauge { .. } => "request_progress_gauge",
            Request::GaugeTick { .. } => "progress_now",
            Request::ReleaseGauge => "close_progress_gauge",
            Request::MissingModels { .. } => "model_dir_unexist",
            Request::Message { .. } => "msg",
        }
    }
}

/// The user's answer to a mid-operation question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecision {
    /// Proceed with the operation (e.g. download the missing dependency).
    Continue,
    /// Abandon the operation cleanly.
    Exit,
}

/// A reply produced by the owner thread.
///
/// Callers must treat any variant they did not expect for their request as a
/// protocol error and abort the current operation cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Plain acknowledgment.
    Ack,
    /// The shared resource is busy; sleep `seconds` and retry.
    Wait { seconds: u64 },
    /// The shared resource was granted to this caller.
    Granted { token: SessionToken },
    /// The user's answer to a question request.
    Decision(UserDecision),
    /// Fixed reply when no owner handler is registered. Never blocks.
    NoHandler,
    /// The owner could not produce a meaningful reply for this request.
    ProtocolError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tags() {
        assert_eq!(Request::AcquireGauge { total_units: 3 }.tag(), "request_progress_gauge");
        assert_eq!(Request::ReleaseGauge.tag(), "close_progress_gauge");
        assert_eq!(
            Request::MissingModels { names: vec![] }.tag(),
            "model_dir_unexist"
        );
    }

    #[test]
    fn test_message_color_names() {
        assert_eq!(MessageColor::Default.as_str(), "default");
        assert_eq!(MessageColor::Red.as_str(), "red");
    }

    #[test]
    fn test_session_tokens_compare_by_value() {
        assert_eq!(SessionToken::new(7), SessionToken::new(7));
        assert_ne!(SessionToken::new(7), SessionToken::new(8));
        assert_eq!(SessionToken::new(7).value(), 7);
    }
}
