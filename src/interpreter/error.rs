use super::value::TypeTag;

/// Runtime error kinds. Each one formats to the message register the REPL
/// prints verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    UnknownVariable(String),
    AlreadyDefined(String),
    CannotAssign { new: TypeTag, old: TypeTag },
    NotAFunction(String),
    ListIndexOutOfRange,
    PropertyNotFound(String),
    IndexMustBeNumber,
    IndexMustBeInteger,
    NotAList(String),
    SignalOutsideLoop(&'static str),
    TooManyArguments { expected: usize, got: usize },
    TooFewArguments { expected: usize, got: usize },
    RecursionLimit,
    Interpolation(String),
    DestructureArity { expected: usize, got: usize },
    UnknownVariantTag { group: String, tag: String },
    TypeError(String),
}

fn sigil(name: &str) -> String {
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${name}")
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable: {}", sigil(name)),
            Self::AlreadyDefined(name) => write!(f, "error: {} already defined", sigil(name)),
            Self::CannotAssign { new, old } => {
                write!(f, "error: cannot assign {new} to {old}")
            }
            Self::NotAFunction(what) => write!(f, "{what} is not a function"),
            Self::ListIndexOutOfRange => write!(f, "error: list index out of range"),
            Self::PropertyNotFound(prop) => {
                write!(f, "error: table property not found: {prop}")
            }
            Self::IndexMustBeNumber => write!(
                f,
                "error: index must be a number (text atoms cannot be used as indices)"
            ),
            Self::IndexMustBeInteger => write!(f, "error: index must be an integer"),
            Self::NotAList(what) => write!(f, "error: {what} is not a list"),
            Self::SignalOutsideLoop(signal) => {
                write!(f, "error: {signal} used outside of a loop")
            }
            Self::TooManyArguments { expected, got } => {
                write!(f, "error: too many arguments: expected {expected}, got {got}")
            }
            Self::TooFewArguments { expected, got } => {
                write!(f, "error: too few arguments: expected {expected}, got {got}")
            }
            Self::RecursionLimit => write!(f, "error: maximum recursion depth exceeded"),
            Self::Interpolation(msg) => write!(f, "error: interpolation failed: {msg}"),
            Self::DestructureArity { expected, got } => {
                write!(f, "error: expected {expected} values to unpack, got {got}")
            }
            Self::UnknownVariantTag { group, tag } => {
                write!(f, "error: {group} has no variant {tag}")
            }
            Self::TypeError(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
