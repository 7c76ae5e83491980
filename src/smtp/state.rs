//! The ingest session's command-sequencing state machine.
//!
//! Pure transitions, no I/O: the session loop feeds parsed commands in and
//! acts on the returned [`Action`]. Each state accepts a fixed set of
//! commands; everything else is a `503`.

use super::command::{bracketed, Command};

/// Where the session stands in the command dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Greeting sent, waiting for HELO/EHLO.
    #[default]
    ExpectHelo,
    /// Waiting for MAIL FROM.
    ExpectMailFrom,
    /// MAIL FROM accepted; at least one RCPT TO required.
    ExpectRcptTo,
    /// One or more recipients accepted; RCPT TO or DATA may follow.
    ExpectRcptToOrData,
}

/// What the session loop must do for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `250 welcome`
    Greet,
    /// Record the sender and answer `250 ok`.
    Sender(Vec<u8>),
    /// Record a recipient and answer `250 ok`.
    Recipient(Vec<u8>),
    /// `354`, then consume the message body.
    BeginData,
    /// `221 Bye`, close the connection.
    Quit,
    /// `501 missing or malformed local part`
    Malformed,
    /// `503 bad sequence of commands`
    BadSequence,
    /// `500 unknown command`
    Unknown(Vec<u8>),
}

impl SessionState {
    /// Apply one command, yielding the next state and the action to take.
    #[must_use]
    pub fn transition(self, command: Command) -> (Self, Action) {
        match (self, command) {
            (_, Command::Quit) => (self, Action::Quit),
            (_, Command::Unknown(line)) => (self, Action::Unknown(line)),

            (Self::ExpectHelo, Command::Helo(_) | Command::Ehlo(_)) => {
                (Self::ExpectMailFrom, Action::Greet)
            }

            (Self::ExpectMailFrom, Command::MailFrom(argument)) => match bracketed(&argument) {
                Some(address) => (Self::ExpectRcptTo, Action::Sender(address.to_vec())),
                None => (self, Action::Malformed),
            },

            (Self::ExpectRcptTo | Self::ExpectRcptToOrData, Command::RcptTo(argument)) => {
                match bracketed(&argument) {
                    Some(address) => {
                        (Self::ExpectRcptToOrData, Action::Recipient(address.to_vec()))
                    }
                    None => (self, Action::Malformed),
                }
            }

            // After the body (queued or not) the session is ready for the
            // next transaction.
            (Self::ExpectRcptToOrData, Command::Data) => {
                (Self::ExpectMailFrom, Action::BeginData)
            }

            (state, _) => (state, Action::BadSequence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = SessionState::default();
        let (state, action) = state.transition(Command::parse(b"EHLO client"));
        assert_eq!(action, Action::Greet);

        let (state, action) = state.transition(Command::parse(b"MAIL FROM:<a@b>"));
        assert_eq!(action, Action::Sender(b"a@b".to_vec()));
        assert_eq!(state, SessionState::ExpectRcptTo);

        let (state, action) = state.transition(Command::parse(b"RCPT TO:<c@d>"));
        assert_eq!(action, Action::Recipient(b"c@d".to_vec()));

        let (state, action) = state.transition(Command::parse(b"RCPT TO:<e@f>"));
        assert_eq!(action, Action::Recipient(b"e@f".to_vec()));
        assert_eq!(state, SessionState::ExpectRcptToOrData);

        let (state, action) = state.transition(Command::parse(b"DATA"));
        assert_eq!(action, Action::BeginData);
        assert_eq!(state, SessionState::ExpectMailFrom);
    }

    #[test]
    fn out_of_sequence_commands_yield_503() {
        let state = SessionState::default();
        let (state, action) = state.transition(Command::parse(b"MAIL FROM:<a@b>"));
        assert_eq!(action, Action::BadSequence);
        assert_eq!(state, SessionState::ExpectHelo);

        let (_, action) = SessionState::ExpectMailFrom.transition(Command::parse(b"DATA"));
        assert_eq!(action, Action::BadSequence);

        // DATA before any recipient is out of sequence too.
        let (_, action) = SessionState::ExpectRcptTo.transition(Command::parse(b"DATA"));
        assert_eq!(action, Action::BadSequence);
    }

    #[test]
    fn missing_brackets_yield_501_without_state_change() {
        let (state, action) =
            SessionState::ExpectMailFrom.transition(Command::parse(b"MAIL FROM:a@b"));
        assert_eq!(action, Action::Malformed);
        assert_eq!(state, SessionState::ExpectMailFrom);
    }

    #[test]
    fn quit_works_from_any_state() {
        for state in [
            SessionState::ExpectHelo,
            SessionState::ExpectMailFrom,
            SessionState::ExpectRcptTo,
            SessionState::ExpectRcptToOrData,
        ] {
            let (_, action) = state.transition(Command::parse(b"QUIT"));
            assert_eq!(action, Action::Quit);
        }
    }

    #[test]
    fn unknown_commands_do_not_change_state() {
        let (state, action) =
            SessionState::ExpectRcptTo.transition(Command::parse(b"NOOP"));
        assert_eq!(action, Action::Unknown(b"NOOP".to_vec()));
        assert_eq!(state, SessionState::ExpectRcptTo);
    }
}
