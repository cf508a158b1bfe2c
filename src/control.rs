//! Text control messages exchanged alongside binary traffic.
//!
//! The only control command is `Checksum`: every [`CHECKSUM_INTERVAL`] binary
//! messages the sender reports its running counter and byte sum, and the
//! receiver compares them with its own tally. Anything else arriving as a
//! text message is a protocol violation.

use thiserror::Error;

use crate::{
    attributes::{AttributeBlock, AttributeError},
    stats::ChecksumState,
};

/// Binary messages sent between consecutive checksum reports.
pub const CHECKSUM_INTERVAL: u64 = 100;

/// Longest control message accepted, in characters.
pub const MAX_CONTROL_LEN: usize = 1000;

const COMMAND: &str = "Command";
const CHECKSUM_COMMAND: &str = "Checksum";
const COUNTER: &str = "Counter";
const CHECKSUM: &str = "Checksum";

/// Reasons a control message is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The message exceeded [`MAX_CONTROL_LEN`].
    #[error("control message of {len} characters exceeds {MAX_CONTROL_LEN}")]
    TooLong {
        /// Length of the rejected message.
        len: usize,
    },
    /// The attribute block did not parse.
    #[error("malformed control message: {0}")]
    Malformed(#[from] AttributeError),
    /// A required attribute was absent or not a number.
    #[error("control attribute {0} missing or invalid")]
    BadAttribute(&'static str),
    /// The command is not understood.
    #[error("unknown control command {0:?}")]
    UnknownCommand(String),
    /// The peer's tally disagrees with ours.
    #[error(
        "checksum mismatch: peer reported {} messages / {}, local tally {} messages / {}",
        reported.counter,
        reported.checksum,
        local.counter,
        local.checksum
    )]
    ChecksumMismatch {
        /// State the peer sent.
        reported: ChecksumState,
        /// State computed locally.
        local: ChecksumState,
    },
}

/// Render the checksum report for `state`.
///
/// # Examples
///
/// ```
/// use muxframe::{control::checksum_report, stats::ChecksumState};
///
/// let text = checksum_report(ChecksumState { counter: 100, checksum: 4242 });
/// assert_eq!(text, "Command=Checksum\nCounter=100\nChecksum=4242");
/// ```
#[must_use]
pub fn checksum_report(state: ChecksumState) -> String {
    format!(
        "{COMMAND}={CHECKSUM_COMMAND}\n{COUNTER}={}\n{CHECKSUM}={}",
        state.counter, state.checksum
    )
}

/// Parse a control message into the checksum state it reports.
///
/// # Errors
///
/// Returns a [`ControlError`] for oversized, malformed or unknown messages.
pub fn parse_control(text: &str) -> Result<ChecksumState, ControlError> {
    let len = text.chars().count();
    if len > MAX_CONTROL_LEN {
        return Err(ControlError::TooLong { len });
    }
    let block: AttributeBlock = text.parse()?;
    match block.get(COMMAND) {
        Some(CHECKSUM_COMMAND) => {}
        Some(other) => return Err(ControlError::UnknownCommand(other.to_owned())),
        None => return Err(ControlError::BadAttribute(COMMAND)),
    }
    let counter = block
        .get(COUNTER)
        .and_then(|v| v.parse().ok())
        .ok_or(ControlError::BadAttribute(COUNTER))?;
    let checksum = block
        .get(CHECKSUM)
        .and_then(|v| v.parse().ok())
        .ok_or(ControlError::BadAttribute(CHECKSUM))?;
    Ok(ChecksumState { counter, checksum })
}

/// Validate a control message against the local receive tally.
///
/// # Errors
///
/// Returns [`ControlError::ChecksumMismatch`] when the states differ, or any
/// parse error from [`parse_control`].
pub fn verify_control(text: &str, local: ChecksumState) -> Result<(), ControlError> {
    let reported = parse_control(text)?;
    if reported == local {
        Ok(())
    } else {
        Err(ControlError::ChecksumMismatch { reported, local })
    }
}

/// Returns `true` when the `counter`-th sent message should be followed by
/// a checksum report.
#[must_use]
pub fn report_due(counter: u64) -> bool { counter > 0 && counter % CHECKSUM_INTERVAL == 0 }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn report_parses_back() {
        let state = ChecksumState {
            counter: 200,
            checksum: u32::MAX,
        };
        assert_eq!(parse_control(&checksum_report(state)), Ok(state));
    }

    #[rstest]
    #[case(0, false)]
    #[case(99, false)]
    #[case(100, true)]
    #[case(150, false)]
    #[case(200, true)]
    fn reports_follow_every_hundredth_message(#[case] counter: u64, #[case] due: bool) {
        assert_eq!(report_due(counter), due);
    }

    #[rstest]
    #[case("Command=Reboot", "unknown control command")]
    #[case("Counter=1\nChecksum=2", "Command missing")]
    #[case("Command=Checksum\nCounter=x\nChecksum=2", "Counter missing")]
    #[case("Command=Checksum\nCounter=1\nChecksum=-2", "Checksum missing")]
    #[case("garbage", "malformed control message")]
    fn rejects_invalid_messages(#[case] text: &str, #[case] expected: &str) {
        let err = parse_control(text).expect_err("must fail");
        assert!(err.to_string().contains(expected), "got {err}");
    }

    #[test]
    fn rejects_oversized_messages() {
        let text = format!("Command=Checksum\nPadding={}", "x".repeat(MAX_CONTROL_LEN));
        assert!(matches!(
            parse_control(&text),
            Err(ControlError::TooLong { .. })
        ));
    }

    #[test]
    fn mismatch_is_reported_with_both_states() {
        let local = ChecksumState {
            counter: 100,
            checksum: 10,
        };
        let text = checksum_report(ChecksumState {
            counter: 100,
            checksum: 11,
        });
        let err = verify_control(&text, local).expect_err("mismatch");
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
