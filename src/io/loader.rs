use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("program is empty")]
    Empty,
    #[error("program is not a hex value: {0}")]
    InvalidHex(String),
    #[error("program is {size} bytes, partitions hold {capacity}")]
    TooLarge { size: usize, capacity: usize },
}

/// Parses program text such as `A9 03 8D 40 00 00` into bytes. Tokens are
/// separated by whitespace; a token may carry several bytes (`A9038D`).
pub fn parse_program(source: &str) -> Result<Vec<u8>, LoadError> {
    let mut program = Vec::new();

    for token in source.split_whitespace() {
        if token.len() % 2 != 0 {
            return Err(LoadError::InvalidHex(token.to_string()));
        }
        let bytes = hex::decode(token).map_err(|_| LoadError::InvalidHex(token.to_string()))?;
        program.extend(bytes);
    }

    if program.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_spaced_bytes() {
        let program = parse_program("A9 03 8D 40 00\n00").unwrap();
        assert_eq!(program, vec![0xA9, 0x03, 0x8D, 0x40, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_program_packed_bytes() {
        let program = parse_program("a9038d").unwrap();
        assert_eq!(program, vec![0xA9, 0x03, 0x8D]);
    }

    #[test]
    fn test_parse_program_missing_value() {
        assert_eq!(parse_program("  \n "), Err(LoadError::Empty));
    }

    #[test]
    fn test_parse_program_not_hex() {
        assert_eq!(parse_program("A9 ZZ"), Err(LoadError::InvalidHex("ZZ".to_string())));
        assert_eq!(parse_program("A9 0"), Err(LoadError::InvalidHex("0".to_string())));
    }
}
