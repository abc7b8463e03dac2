use thiserror::Error;

pub type NgmResult<T> = Result<T, NgmError>;

#[derive(Error, Debug)]
pub enum NgmError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}
