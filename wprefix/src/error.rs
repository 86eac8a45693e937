// Copyright 2022 Oxide Computer Company

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    /// What was being attempted when the input was rejected.
    pub context: &'static str,

    /// Message associated with this error.
    pub message: String,
}

impl InvalidInput {
    pub fn new(context: &'static str, message: impl Into<String>) -> Self {
        Self {
            context,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid input: {}: {}", self.context, self.message)
    }
}

impl std::error::Error for InvalidInput {}

/// A block landed on an offset that is not a multiple of its size. This can
/// only happen if blocks are handed to the compiler out of descending size
/// order, which `decompose` never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentError {
    /// Cumulative offset the block would have been placed at.
    pub offset: u64,

    /// Size of the offending block.
    pub size: u64,

    /// Debug rendering of the backend that owns the block.
    pub backend: String,
}

impl fmt::Display for AlignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alignment violated: block of size {} for backend {} at offset {}",
            self.size, self.backend, self.offset,
        )
    }
}

impl std::error::Error for AlignmentError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidInput(InvalidInput),
    Alignment(AlignmentError),
}

impl Error {
    pub(crate) fn invalid(
        context: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInput(InvalidInput::new(context, message))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Self::InvalidInput(e) => e.fmt(f),
            Self::Alignment(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::InvalidInput(e) => Some(e),
            Self::Alignment(e) => Some(e),
        }
    }
}

impl From<InvalidInput> for Error {
    fn from(e: InvalidInput) -> Self {
        Self::InvalidInput(e)
    }
}

impl From<AlignmentError> for Error {
    fn from(e: AlignmentError) -> Self {
        Self::Alignment(e)
    }
}
