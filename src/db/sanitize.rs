//! Input validation for values that end up in file names or SQL text.
//!
//! Document values are always bound as parameters; these checks cover the
//! identifiers that cannot be: project ids (database file names) and JSON
//! field paths (compiled into quoted `$."a"."b"` paths).

/// Maximum length for a project id.
pub const MAX_PROJECT_ID_LENGTH: usize = 128;

/// Maximum length for field paths.
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Upper bound for page sizes.
pub const MAX_LIMIT: usize = 1000;

/// Validates a project id. Only ASCII alphanumerics, `-` and `_` are allowed
/// because the id becomes the per-project database file name.
pub fn validate_project_id(s: &str) -> Result<(), SqlSanitizeError> {
  if s.is_empty() {
    return Err(SqlSanitizeError::EmptyIdentifier);
  }

  if s.len() > MAX_PROJECT_ID_LENGTH {
    return Err(SqlSanitizeError::IdentifierTooLong(s.len(), MAX_PROJECT_ID_LENGTH));
  }

  for c in s.chars() {
    if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
      return Err(SqlSanitizeError::InvalidProjectChar(c));
    }
  }

  Ok(())
}

/// Validates a dotted JSON field path such as `address.city` or
/// `contact.first-name`. Segments are quoted when compiled, so any key is
/// accepted except one holding a double quote or a control character.
pub fn validate_field_path(s: &str) -> Result<(), SqlSanitizeError> {
  if s.is_empty() {
    return Err(SqlSanitizeError::EmptyIdentifier);
  }

  if s.len() > MAX_IDENTIFIER_LENGTH {
    return Err(SqlSanitizeError::IdentifierTooLong(s.len(), MAX_IDENTIFIER_LENGTH));
  }

  if s.starts_with('.') || s.ends_with('.') || s.contains("..") {
    return Err(SqlSanitizeError::InvalidFieldPath(s.to_string()));
  }

  if let Some(c) = s.chars().find(|c| *c == '"' || c.is_control()) {
    return Err(SqlSanitizeError::InvalidIdentifierChar(c));
  }

  Ok(())
}

/// Validates that a limit value is within acceptable bounds.
pub fn validate_limit(limit: usize) -> Result<(), SqlSanitizeError> {
  if limit > MAX_LIMIT {
    return Err(SqlSanitizeError::LimitTooLarge(limit, MAX_LIMIT));
  }
  Ok(())
}

/// Escapes `%`, `_` and `\` so a search term matches literally inside
/// `LIKE ? ESCAPE '\'`.
pub fn escape_like(term: &str) -> String {
  let mut escaped = String::with_capacity(term.len() + 8);
  for c in term.chars() {
    match c {
      '%' | '_' | '\\' => {
        escaped.push('\\');
        escaped.push(c);
      }
      _ => escaped.push(c),
    }
  }
  escaped
}

/// Quotes an identifier read from `sqlite_master` for use in generated SQL.
pub fn quote_identifier(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL sanitization errors
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSanitizeError {
  EmptyIdentifier,
  IdentifierTooLong(usize, usize),
  InvalidIdentifierChar(char),
  InvalidProjectChar(char),
  InvalidFieldPath(String),
  LimitTooLarge(usize, usize),
  InvalidOrderDirection(String),
}

impl std::fmt::Display for SqlSanitizeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::EmptyIdentifier => write!(f, "Identifier cannot be empty"),
      Self::IdentifierTooLong(len, max) => write!(f, "Identifier too long: {} > {}", len, max),
      Self::InvalidIdentifierChar(c) => {
        write!(f, "Invalid character in field name: '{}'", c)
      }
      Self::InvalidProjectChar(c) => {
        write!(
          f,
          "Project ids must be alphanumeric, '-' or '_', got '{}'",
          c
        )
      }
      Self::InvalidFieldPath(s) => write!(f, "Invalid field path: {}", s),
      Self::LimitTooLarge(got, max) => write!(f, "Limit {} exceeds maximum {}", got, max),
      Self::InvalidOrderDirection(s) => {
        write!(f, "Invalid order direction '{}', must be asc or desc", s)
      }
    }
  }
}

impl std::error::Error for SqlSanitizeError {}
