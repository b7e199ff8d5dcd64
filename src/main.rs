use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use enzo::{evaluate, parse, Outcome, Scope, Value};

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        run_repl().map_err(|err| err.to_string())?;
    } else {
        run_script(&args[1])?;
    }
    Ok(())
}

fn run_script(filename: &str) -> Result<(), String> {
    let path = PathBuf::from(filename);
    let mut included = HashSet::new();
    let source = load_source(&path, &mut included)?;
    let env = Scope::root();
    let (statements, rest) = split_statements(&source);
    for chunk in &statements {
        run_statement(chunk, &env);
    }
    if !is_blank(&rest) {
        run_statement(&rest, &env);
    }
    Ok(())
}

/// Read a source file, splicing `@include` lines in place. Paths resolve
/// relative to the including file; a file may only appear once per chain.
fn load_source(path: &Path, included: &mut HashSet<PathBuf>) -> Result<String, String> {
    let canonical = path
        .canonicalize()
        .map_err(|err| format!("error: cannot read {}: {err}", path.display()))?;
    if !included.insert(canonical.clone()) {
        return Err(format!("error: include cycle: {}", path.display()));
    }
    let text = std::fs::read_to_string(&canonical)
        .map_err(|err| format!("error: cannot read {}: {err}", path.display()))?;
    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(target) = trimmed.strip_prefix("@include ") {
            let target = target.trim().trim_end_matches(';').trim();
            out.push_str(&load_source(&base.join(target), included)?);
            out.push('\n');
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    included.remove(&canonical);
    Ok(out)
}

/// Parse and evaluate one top-level statement, printing its value or its
/// error. A failing statement never stops the ones after it.
fn run_statement(source: &str, env: &enzo::ScopeRef) {
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(title) = trimmed.strip_prefix("//=") {
            println!("//={title}");
        }
    }
    if is_blank(source) {
        return;
    }
    match parse(source) {
        Ok(stmt) => match evaluate(&stmt, env, true) {
            Ok(Outcome::Value(value)) | Ok(Outcome::Return(value)) => {
                if !matches!(value, Value::Empty) {
                    println!("{value}");
                }
            }
            Ok(Outcome::EndLoop) => println!("error: end-loop used outside of a loop"),
            Ok(Outcome::RestartLoop) => println!("error: restart-loop used outside of a loop"),
            Err(err) => println!("{err}"),
        },
        Err(err) => println!("{err}"),
    }
}

/// True when the chunk holds no code, only whitespace and comments.
fn is_blank(source: &str) -> bool {
    let mut rest = source.trim();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim();
        } else if let Some(after) = rest.strip_prefix("/'") {
            match after.split_once("'/") {
                Some((_, r)) => rest = r.trim(),
                None => return false,
            }
        } else {
            return false;
        }
    }
    true
}

/// Split source into complete top-level statements (each ending at a `;`
/// outside any bracket, text literal, or comment) plus the unfinished tail.
fn split_statements(source: &str) -> (Vec<String>, String) {
    let mut statements = vec![];
    let mut depth = 0usize;
    let bytes = source.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'\'') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'\'' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            // `If ...; Else ...` is one statement; the grammar consumes the
            // `; Else` continuation itself.
            b';' if depth == 0 => {
                if !else_follows(bytes, i + 1) {
                    statements.push(source[start..=i].to_string());
                    start = i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    (statements, source[start.min(source.len())..].to_string())
}

fn else_follows(bytes: &[u8], mut i: usize) -> bool {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if !bytes[i..].starts_with(b"Else") {
        return false;
    }
    match bytes.get(i + 4) {
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-'),
        None => true,
    }
}

fn run_repl() -> rustyline::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let env = Scope::root();
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "enzo> " } else { "...   " };
        match rl.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                let (statements, rest) = split_statements(&buffer);
                if statements.is_empty() && !is_blank(&rest) {
                    continue;
                }
                for statement in &statements {
                    rl.add_history_entry(statement.trim())?;
                    run_statement(statement, &env);
                }
                buffer = if is_blank(&rest) { String::new() } else { rest };
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::split_statements;

    #[test]
    fn test_splits_at_top_level_semicolons() {
        let (statements, rest) = split_statements("$x: 1; $y: 2;");
        assert_eq!(2, statements.len());
        assert!(rest.trim().is_empty());
    }

    #[test]
    fn test_semicolons_inside_brackets_do_not_split() {
        let (statements, _) = split_statements("Loop, ( $x <: $x + 1; end-loop; );");
        assert_eq!(1, statements.len());
    }

    #[test]
    fn test_else_chain_stays_in_one_statement() {
        let (statements, rest) = split_statements("If 1, (1;); Else, (2;); $x: 3;");
        assert_eq!(2, statements.len());
        assert_eq!("If 1, (1;); Else, (2;);", statements[0].trim());
        assert_eq!("$x: 3;", statements[1].trim());
        assert!(rest.trim().is_empty());
    }

    #[test]
    fn test_else_if_chain_stays_in_one_statement() {
        let (statements, _) =
            split_statements("If 0, (1;); Else if 0, (2;); Else, (3;);");
        assert_eq!(1, statements.len());
    }

    #[test]
    fn test_unfinished_statement_is_the_remainder() {
        let (statements, rest) = split_statements("$x: 1; $y: [1,");
        assert_eq!(1, statements.len());
        assert_eq!("$y: [1,", rest.trim());
    }
}
