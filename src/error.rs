//! Error types for the driver.
//!
//! Three layers, matching how failures propagate:
//!
//! - [`ScriptError`]: a single script command failed. The interpreter
//!   prints the `ERROR <CATEGORY> <detail>` diagnostic and advances to the
//!   next line.
//! - [`ClientError`]: a client worker failed to reach its server. Fatal to
//!   that client only; the driver keeps running.
//! - [`LineError`]: the terminal condition of a client's reader. Carried
//!   inside the last `TextLine` a worker delivers.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// A script command that could not be executed.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script syntax {0}")]
    Syntax(String),

    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("unknown client {0}")]
    UnknownClient(String),

    #[error("duplicate client {0}")]
    DuplicateClient(String),

    #[error("invalid server spec {0}")]
    BadServer(String),

    #[error("invalid duration {0}")]
    BadDuration(String),

    #[error("invalid pattern: {0}")]
    BadPattern(#[from] regex::Error),

    #[error("unknown client variable {0}")]
    UnknownVariable(String),
}

impl ScriptError {
    /// Render the `ERROR <CATEGORY> <detail>` diagnostic for stdout.
    pub fn report(&self) -> String {
        match self {
            Self::Syntax(line) => format!("ERROR INPUT :invalid script syntax {line}"),
            Self::MissingArgument(cmd) => format!("ERROR COMMAND {cmd} :missing argument"),
            Self::UnknownClient(name) => format!("ERROR BADNAME {name} :Unknown client"),
            Self::DuplicateClient(name) => format!("ERROR BADNAME {name} :Duplicate client"),
            Self::BadServer(spec) => format!("ERROR COMMAND CLIENT :invalid server {spec}"),
            Self::BadDuration(value) => format!("ERROR COMMAND EXPECT :invalid duration {value}"),
            Self::BadPattern(err) => format!("ERROR COMMAND EXPECT :invalid pattern: {err}"),
            Self::UnknownVariable(name) => {
                format!("ERROR EXPAND :unknown client variable {name}")
            }
        }
    }
}

/// A connection attempt that did not produce a usable client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("no usable address for {0}")]
    NoAddress(String),

    #[error("invalid server name {0}")]
    ServerName(String),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),
}

/// Why a client's reader stopped. The worker sends exactly one of these,
/// as the final `TextLine` for the connection.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("line too long")]
    TooLong,

    #[error("EOF")]
    Eof,

    #[error("connection closed")]
    Closed,
}

impl From<LinesCodecError> for LineError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::TooLong,
            LinesCodecError::Io(err) => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_error_reports_category_lines() {
        assert_eq!(
            ScriptError::UnknownClient("joe".into()).report(),
            "ERROR BADNAME joe :Unknown client"
        );
        assert_eq!(
            ScriptError::BadDuration("1x".into()).report(),
            "ERROR COMMAND EXPECT :invalid duration 1x"
        );
        assert_eq!(
            ScriptError::UnknownVariable("chan".into()).report(),
            "ERROR EXPAND :unknown client variable chan"
        );
    }

    #[test]
    fn codec_errors_map_to_line_errors() {
        let err = LineError::from(LinesCodecError::MaxLineLengthExceeded);
        assert!(matches!(err, LineError::TooLong));
    }
}
