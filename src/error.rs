//! The error type shared across the autoscaler
use reqwest::StatusCode;

/// An error from the autoscaler
#[derive(Debug)]
pub enum Error {
    /// A subprocess exited with a non-zero status
    Execution {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    /// We failed to parse some external data (XML, text, dates)
    Parsing(String),
    /// A worker lifecycle precondition failed (run not RUNNING, pod IP timeout, ...)
    Scaling(String),
    /// An error from the cloud pipeline API
    Api {
        status: Option<StatusCode>,
        msg: Option<String>,
    },
    /// An error from sending or receiving an HTTP request
    Reqwest(reqwest::Error),
    /// An IO error
    Io(std::io::Error),
    /// An error from parsing a timestamp
    ChronoParse(chrono::ParseError),
    /// An error from parsing XML
    Xml(quick_xml::Error),
    /// An error from parsing an int
    ParseInt(std::num::ParseIntError),
    /// An error loading our config
    Config(config::ConfigError),
    /// An error from joining a tokio task
    Join(tokio::task::JoinError),
    /// A generic error with a message
    Generic(String),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Build a scaling precondition error
    pub fn scaling<T: Into<String>>(msg: T) -> Self {
        Error::Scaling(msg.into())
    }

    /// Build a parsing error
    pub fn parsing<T: Into<String>>(msg: T) -> Self {
        Error::Parsing(msg.into())
    }

    /// Get the message for this error if one exists
    pub fn msg(&self) -> Option<String> {
        match self {
            Error::Execution {
                command, stderr, ..
            } => Some(format!("command `{command}` failed: {stderr}")),
            Error::Parsing(msg) => Some(msg.clone()),
            Error::Scaling(msg) => Some(msg.clone()),
            Error::Api { msg, .. } => msg.clone(),
            Error::Reqwest(err) => Some(err.to_string()),
            Error::Io(err) => Some(err.to_string()),
            Error::ChronoParse(err) => Some(err.to_string()),
            Error::Xml(err) => Some(err.to_string()),
            Error::ParseInt(err) => Some(err.to_string()),
            Error::Config(err) => Some(err.to_string()),
            Error::Join(err) => Some(err.to_string()),
            Error::Generic(msg) => Some(msg.clone()),
        }
    }

    /// Get the kind of error as a str
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Execution { .. } => "Execution",
            Error::Parsing(_) => "Parsing",
            Error::Scaling(_) => "Scaling",
            Error::Api { .. } => "Api",
            Error::Reqwest(_) => "Reqwest",
            Error::Io(_) => "Io",
            Error::ChronoParse(_) => "ChronoParse",
            Error::Xml(_) => "Xml",
            Error::ParseInt(_) => "ParseInt",
            Error::Config(_) => "Config",
            Error::Join(_) => "Join",
            Error::Generic(_) => "Generic",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.msg() {
            Some(msg) => write!(f, "{}: {msg}", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Reqwest(error)
    }
}

impl From<chrono::ParseError> for Error {
    fn from(error: chrono::ParseError) -> Self {
        Error::ChronoParse(error)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(error: quick_xml::Error) -> Self {
        Error::Xml(error)
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(error: quick_xml::DeError) -> Self {
        Error::Xml(quick_xml::Error::Io(std::sync::Arc::new(
            std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string()),
        )))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error::ParseInt(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::Join(error)
    }
}
