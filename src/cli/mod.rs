//! CLI command implementations.

pub mod extract;
pub mod inject;
pub mod list;
pub mod smol;
pub mod verify;

use binject::Error;

/// Map the error taxonomy onto process exit codes.
///
/// 0 success, 1 generic error, then one code per kind so shell callers can
/// branch without parsing messages.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::InvalidArgs(_) | Error::TooLong { .. } => 2,
        Error::PermissionDenied { .. } => 3,
        Error::InvalidFormat(_) | Error::UnsupportedArch(_) => 4,
        Error::SectionNotFound(_) => 5,
        Error::WriteFailed(_) => 6,
        Error::Decompress(_) | Error::Io(_) => 1,
    }
}
