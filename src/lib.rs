mod parser;
pub use parser::ast;
pub use parser::{parse, parse_program, tokenize, ParseError};

mod interpreter;
pub use interpreter::environment::{Scope, ScopeRef};
pub use interpreter::error::RuntimeError;
pub use interpreter::value::Value;
pub use interpreter::{evaluate, evaluate_program, Outcome};
