//! Errors that occur while building the font.

/// An error in the input the builder was given.
#[derive(Debug)]
pub enum Error {
    /// Two schemas in the seed table map the same code points.
    DuplicateCodePoints(Vec<u32>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicateCodePoints(cps) => {
                write!(f, "duplicate code points in the schema table:")?;
                for cp in cps {
                    write!(f, " U+{cp:04X}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_code_points_list_in_hex() {
        let error = Error::DuplicateCodePoints(vec![0x1BC02, 0x25CC]);
        assert_eq!(
            error.to_string(),
            "duplicate code points in the schema table: U+1BC02 U+25CC",
        );
    }
}
