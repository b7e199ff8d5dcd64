#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    message: String,
    code_line: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code_line: None,
        }
    }

    pub fn with_line(message: impl Into<String>, code_line: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code_line: Some(code_line.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code_line(&self) -> Option<&str> {
        self.code_line.as_deref()
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(line) = &self.code_line {
            for part in line.lines() {
                write!(f, "\n    {}", part.trim_end())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}
