//! Whitespace-token reader used by the checkpoint format.

use crate::errors::CheckpointError;
use std::io::BufRead;
use std::str::FromStr;

/// Pulls whitespace-separated tokens out of a buffered reader, one line at a
/// time.
pub struct TokenReader<R> {
    reader: R,
    line: Vec<String>,
    next: usize,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            next: 0,
        }
    }

    /// Next raw token, or `None` at end of stream.
    pub fn next_token(&mut self) -> Result<Option<String>, CheckpointError> {
        while self.next == self.line.len() {
            let mut buf = String::new();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line = buf.split_whitespace().map(str::to_owned).collect();
            self.next = 0;
        }
        self.next += 1;
        Ok(Some(std::mem::take(&mut self.line[self.next - 1])))
    }

    /// Next token, failing with [`CheckpointError::Truncated`] at end of
    /// stream.
    pub fn token(&mut self, field: &'static str) -> Result<String, CheckpointError> {
        self.next_token()?
            .ok_or(CheckpointError::Truncated { field })
    }

    /// Next token parsed as `T`.
    pub fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, CheckpointError> {
        let token = self.token(field)?;
        token
            .parse()
            .map_err(|_| CheckpointError::Malformed {
                field,
                value: token,
            })
    }

    /// Next token read as a `0`/`1` flag.
    pub fn flag(&mut self, field: &'static str) -> Result<bool, CheckpointError> {
        match self.token(field)?.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(CheckpointError::Malformed {
                field,
                value: other.to_string(),
            }),
        }
    }

    /// `n` tokens parsed as `T`.
    pub fn parse_vec<T: FromStr>(&mut self, n: usize, field: &'static str) -> Result<Vec<T>, CheckpointError> {
        (0..n).map(|_| self.parse(field)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tokens_across_lines() {
        let mut r = TokenReader::new(Cursor::new("1.8 data.fa\n\n  4\n0 1 x\n"));
        assert_eq!(r.token("version").unwrap(), "1.8");
        assert_eq!(r.token("datafile").unwrap(), "data.fa");
        assert_eq!(r.parse::<usize>("ncat").unwrap(), 4);
        assert!(!r.flag("a").unwrap());
        assert!(r.flag("b").unwrap());
        assert!(matches!(
            r.flag("c"),
            Err(CheckpointError::Malformed { field: "c", .. })
        ));
        assert!(matches!(
            r.token("end"),
            Err(CheckpointError::Truncated { field: "end" })
        ));
    }

    #[test]
    fn test_parse_vec() {
        let mut r = TokenReader::new(Cursor::new("0.5 0.25\n0.125"));
        assert_eq!(r.parse_vec::<f64>(3, "v").unwrap(), vec![0.5, 0.25, 0.125]);
    }
}
