pub mod ast;
mod error;
mod grammar;
pub mod tokenizer;

pub use error::ParseError;
pub use grammar::{parse, parse_program};
pub use tokenizer::tokenize;

#[cfg(test)]
mod test;
