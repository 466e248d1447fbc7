use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use comms::DecodeErr;

/// The coordinator's result type.
pub type Result<T> = std::result::Result<T, CoordinatorErr>;

/// All errors that can occur while driving a training session.
#[derive(Debug)]
pub enum CoordinatorErr {
    /// An inbound message was rejected, no session was touched.
    Decode(DecodeErr),
    /// The flat weights and the shape manifest disagree, the round is aborted.
    ShapeMismatch(ShapeMismatchErr),
    /// The converter rejected a model, the round is aborted.
    Conversion(ConversionErr),
    /// A persisted model could not be read or rewritten.
    Model(ModelErr),
    /// A round-advancing operation was attempted in the wrong state.
    State(StateErr),
    /// The node's configuration could not be loaded.
    Config(ConfigErr),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl Display for CoordinatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::ShapeMismatch(e) => write!(f, "shape mismatch: {e}"),
            Self::Conversion(e) => write!(f, "conversion error: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::State(e) => write!(f, "state error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for CoordinatorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::ShapeMismatch(e) => Some(e),
            Self::Conversion(e) => Some(e),
            Self::Model(e) => Some(e),
            Self::State(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<DecodeErr> for CoordinatorErr {
    fn from(value: DecodeErr) -> Self {
        Self::Decode(value)
    }
}

impl From<ShapeMismatchErr> for CoordinatorErr {
    fn from(value: ShapeMismatchErr) -> Self {
        Self::ShapeMismatch(value)
    }
}

impl From<ConversionErr> for CoordinatorErr {
    fn from(value: ConversionErr) -> Self {
        Self::Conversion(value)
    }
}

/// Shape disagreements found while reading or rewriting a model are shape
/// mismatches, whichever layer detects them.
impl From<ModelErr> for CoordinatorErr {
    fn from(value: ModelErr) -> Self {
        match value {
            ModelErr::Shape(e) => Self::ShapeMismatch(e),
            other => Self::Model(other),
        }
    }
}

impl From<StateErr> for CoordinatorErr {
    fn from(value: StateErr) -> Self {
        Self::State(value)
    }
}

impl From<ConfigErr> for CoordinatorErr {
    fn from(value: ConfigErr) -> Self {
        Self::Config(value)
    }
}

impl From<io::Error> for CoordinatorErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Misalignment between a flat weight vector and a shape manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeMismatchErr {
    /// An entry's shape has a zero dimension.
    EmptyShape { entry: String },
    /// An entry's element count doesn't fit in a `usize`.
    Overflow { entry: String },
    /// The vector ends before the entry is complete.
    Underrun {
        entry: String,
        needed: usize,
        available: usize,
    },
    /// Every entry was filled but elements remain.
    Leftover { consumed: usize, len: usize },
    /// A vector's length doesn't match the manifest's total.
    Length { got: usize, expected: usize },
    /// A tensor's shape differs from the one recorded for it.
    Tensor {
        entry: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl Display for ShapeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyShape { entry } => write!(f, "tensor {entry:?} declares a zero-sized shape"),
            Self::Overflow { entry } => write!(f, "tensor {entry:?} is too large to address"),
            Self::Underrun {
                entry,
                needed,
                available,
            } => write!(
                f,
                "tensor {entry:?} needs {needed} values but only {available} remain"
            ),
            Self::Leftover { consumed, len } => write!(
                f,
                "manifest consumed {consumed} values of a vector of length {len}"
            ),
            Self::Length { got, expected } => {
                write!(f, "got {got} values, the manifest expects {expected}")
            }
            Self::Tensor {
                entry,
                got,
                expected,
            } => write!(f, "tensor {entry:?} has shape {got:?}, expected {expected:?}"),
        }
    }
}

impl Error for ShapeMismatchErr {}

/// Failures reported by a `Converter`.
#[derive(Debug)]
pub enum ConversionErr {
    /// The input is not a model the converter understands.
    InvalidModel { path: PathBuf, reason: String },
    /// Reading the model or writing the serving artifact failed.
    Io(io::Error),
}

impl Display for ConversionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModel { path, reason } => {
                write!(f, "{} is not a valid model: {reason}", path.display())
            }
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ConversionErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConversionErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Failures while reading or rewriting a persisted safetensors model.
#[derive(Debug)]
pub enum ModelErr {
    /// The bytes are not a readable safetensors file.
    Format(safetensors::SafeTensorError),
    /// The manifest names a tensor the model doesn't have.
    UnknownTensor(String),
    /// The tensor's dtype can't hold injected `f64` values.
    UnsupportedDtype { tensor: String, dtype: String },
    /// The injected tensor doesn't match the model's tensor.
    Shape(ShapeMismatchErr),
    Io(io::Error),
}

impl Display for ModelErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(e) => write!(f, "invalid safetensors data: {e}"),
            Self::UnknownTensor(name) => write!(f, "model has no tensor named {name:?}"),
            Self::UnsupportedDtype { tensor, dtype } => {
                write!(f, "tensor {tensor:?} has unsupported dtype {dtype}")
            }
            Self::Shape(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ModelErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::Shape(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<safetensors::SafeTensorError> for ModelErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Format(value)
    }
}

impl From<io::Error> for ModelErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Operations attempted against a session in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateErr {
    /// No session has been started yet.
    NoSession,
    /// The session was terminated, it won't advance anymore.
    Terminated { session_id: String },
    /// The update targets another session.
    SessionMismatch { expected: String, got: String },
    /// The update targets another round.
    RoundMismatch { expected: u64, got: u64 },
}

impl Display for StateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no session has been started"),
            Self::Terminated { session_id } => write!(f, "session {session_id} is terminated"),
            Self::SessionMismatch { expected, got } => {
                write!(f, "update for session {got}, the active session is {expected}")
            }
            Self::RoundMismatch { expected, got } => {
                write!(f, "update for round {got}, the current round is {expected}")
            }
        }
    }
}

impl Error for StateErr {}

/// Failures while loading a `NodeConfig`.
#[derive(Debug)]
pub enum ConfigErr {
    /// The config file couldn't be read.
    Read { path: PathBuf, source: io::Error },
    /// The config file isn't valid JSON for a `NodeConfig`.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// An environment override holds an unusable value.
    Env { var: &'static str, value: String },
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
            Self::Env { var, value } => write!(f, "invalid value {value:?} for {var}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Env { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_shape_errors_are_shape_mismatches() {
        let shape = ShapeMismatchErr::Tensor {
            entry: "dense/kernel".into(),
            got: vec![4],
            expected: vec![2, 2],
        };

        let err = CoordinatorErr::from(ModelErr::Shape(shape.clone()));
        assert!(matches!(err, CoordinatorErr::ShapeMismatch(e) if e == shape));

        let err = CoordinatorErr::from(ModelErr::UnknownTensor("conv/bias".into()));
        assert!(matches!(err, CoordinatorErr::Model(ModelErr::UnknownTensor(_))));
    }
}
