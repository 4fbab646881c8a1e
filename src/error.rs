use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid mapping, unknown reference, conflicting declarations.
    /// Fatal to the source being parsed; never retried.
    #[error("Builder Error: {0}")]
    Builder(String),
    /// A forward reference that may resolve once more sources are
    /// registered. Caught only at builder boundaries and queued on a
    /// worklist; reported as a builder error if bootstrap ends with it
    /// still unresolved.
    #[error("Incomplete Element: {0}")]
    IncompleteElement(String),
    /// Runtime execution failure: driver error, key-select row count,
    /// type-handler failure, bad dynamic expression.
    #[error("Executor Error: {0}")]
    Executor(String),
    #[error("Reflection Error: {path} on {class}: {message}")]
    Reflection {
        class: String,
        path: String,
        message: String,
    },
    #[error("Type Conversion Error: {0}")]
    TypeConversion(String),
    #[error("Driver Error: {0}")]
    Driver(String),
    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn builder(msg: impl Into<String>) -> Self {
        Error::Builder(msg.into())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Error::IncompleteElement(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Error::Executor(msg.into())
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::IncompleteElement(_))
    }
}

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Serialization(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Serialization(msg.to_string())
    }
}
