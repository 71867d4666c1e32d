use std::fmt::Write as _;

use nalgebra::DMatrix;

use crate::error::PoseSpaceError;

/// Log a `PoseSpaceError` at error level, optionally prefixed with context.
pub fn log_pose_error(error: &PoseSpaceError, context: Option<&str>) {
    match context {
        Some(ctx) => log::error!("{}: {}", ctx, error),
        None => log::error!("{}", error),
    }
}

/// Result extension for convenient error logging at the host boundary.
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, PoseSpaceError> for Result<T, PoseSpaceError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_pose_error(error, context);
        }
        self
    }
}

/// Render a square matrix as a fixed-width table with row/column indices.
pub(crate) fn format_matrix_table(title: &str, matrix: &DMatrix<f64>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{title}:");

    let mut header = String::from("  ");
    for column in 0..matrix.ncols() {
        let _ = write!(header, "{column:8}");
    }
    let _ = writeln!(out, "{header}");

    for row in 0..matrix.nrows() {
        let _ = write!(out, "{row:2}");
        for column in 0..matrix.ncols() {
            let _ = write!(out, "{:8.3}", matrix[(row, column)]);
        }
        let _ = writeln!(out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_matrix_when_formatting_table_then_rows_are_fixed_width() {
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.25, 1.0]);

        let table = format_matrix_table("P", &matrix);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "P:");
        assert_eq!(lines[1], "         0       1");
        assert_eq!(lines[2], " 0   1.000   0.500");
        assert_eq!(lines[3], " 1   0.250   1.000");
    }

    #[test]
    fn given_error_result_when_logging_then_result_is_passed_through() {
        let result: Result<(), PoseSpaceError> = Err(PoseSpaceError::NoJointsProvided);

        let passed = result.log_error(Some("record pose"));

        assert_eq!(passed, Err(PoseSpaceError::NoJointsProvided));
    }
}
