use std::fmt;

#[derive(Debug)]
pub enum MenuError {
    Admin(String),
    Parse(String),
    Watch(String),
    Io(std::io::Error),
}

impl fmt::Display for MenuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuError::Admin(msg) => write!(f, "Admin API error: {msg}"),
            MenuError::Parse(msg) => write!(f, "Parse error: {msg}"),
            MenuError::Watch(msg) => write!(f, "Watch error: {msg}"),
            MenuError::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for MenuError {}

impl From<std::io::Error> for MenuError {
    fn from(err: std::io::Error) -> Self {
        MenuError::Io(err)
    }
}

impl From<notify::Error> for MenuError {
    fn from(err: notify::Error) -> Self {
        MenuError::Watch(err.to_string())
    }
}
