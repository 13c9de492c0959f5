use serde::{Deserialize, Serialize};

pub type FileId = u32;

/// Source position of a typed node: the file it came from plus its line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl Span {
    pub fn new(file: FileId, line: u32, column: u32) -> Span {
        Span { file, line, column }
    }

    pub fn line(line: u32) -> Span {
        Span {
            file: 0,
            line,
            column: 1,
        }
    }
}
