//! Reading the mutants log produced by the mutant generator.
//!
//! The log has one line per mutant, in id order, e.g.
//! `3:ROR:<=(int,int):<(int,int):Triangle@classify:11:a <= 0 |==> a < 0`.
//! The only facts the analysis needs are the number of lines and, for
//! reporting, the source line each mutant sits on.

use crate::error::{AnalysisError, Result};
use crate::model::Mutant;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutantsLog {
    lines: Vec<String>,
}

impl MutantsLog {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnalysisError::MissingMutantsLog(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        Self { lines }
    }

    /// Number of mutants, N.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn mutants(&self) -> impl Iterator<Item = Mutant> {
        Mutant::range(self.len())
    }

    pub fn entry(&self, mutant: Mutant) -> Option<&str> {
        self.lines.get(mutant.index()).map(String::as_str)
    }

    /// Source line of `mutant`. The generator writes it as the field before
    /// the mutation description; logs that end on the line number are also
    /// accepted.
    pub fn line_number(&self, mutant: Mutant) -> Option<u32> {
        self.entry(mutant).and_then(source_line_of)
    }
}

fn source_line_of(entry: &str) -> Option<u32> {
    let mut fields = entry.rsplit(':');
    let last = fields.next()?;
    if let Some(line) = fields.next().and_then(|field| field.trim().parse().ok()) {
        return Some(line);
    }
    last.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LOG: &str = "\
1:ROR:<=(int,int):<(int,int):Triangle@classify:11:a <= 0 |==> a < 0
2:ROR:<=(int,int):==(int,int):Triangle@classify:11:a <= 0 |==> a == 0
3:LVR:0:POS:Triangle@classify:14:0 |==> 1
";

    fn m(id: u32) -> Mutant {
        Mutant::new(id).unwrap()
    }

    #[test]
    fn test_counts_mutants_and_extracts_lines() {
        let log = MutantsLog::parse(LOG);
        assert_eq!(log.len(), 3);
        assert_eq!(log.line_number(m(1)), Some(11));
        assert_eq!(log.line_number(m(3)), Some(14));
        assert_eq!(log.line_number(m(4)), None);
        assert_eq!(log.mutants().map(Mutant::id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_line_number_when_mutation_text_is_numeric() {
        assert_eq!(source_line_of("5:LVR:0:POS:Foo@bar:27:1"), Some(27));
        assert_eq!(source_line_of("6:STD:Foo@bar:42"), Some(42));
        assert_eq!(source_line_of("no line here"), None);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = MutantsLog::from_path(Path::new("/definitely/not/here/mutants.log")).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingMutantsLog(_)));
    }

    #[test]
    fn test_from_path_ignores_blank_lines() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}\n\n", LOG).unwrap();
        let log = MutantsLog::from_path(temp_file.path()).unwrap();
        assert_eq!(log.len(), 3);
        assert!(!log.is_empty());
    }
}
