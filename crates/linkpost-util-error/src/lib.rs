use std::{error, fmt, iter, result};

pub type BoxedError = Box<dyn error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = result::Result<T, BoxedError>;

/// Displays an error followed by every error in its `source()` chain,
/// separated by `: `, all on one line.
///
/// Meant for log fields, where a multi-line report would be noise.
pub struct FmtCompactError<'e, E>(pub &'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = iter::successors(Some(self.0 as &dyn error::Error), |err| err.source());

        for (i, err) in chain.enumerate() {
            if 0 < i {
                f.write_str(": ")?;
            }
            write!(f, "{err}")?;
        }

        Ok(())
    }
}

pub trait FmtCompact {
    type Report: fmt::Display;
    fn fmt_compact(self) -> Self::Report;
}

impl<'e, E> FmtCompact for &'e E
where
    E: error::Error,
{
    type Report = FmtCompactError<'e, E>;

    fn fmt_compact(self) -> Self::Report {
        FmtCompactError(self)
    }
}

/// Erase the error type of a `Result` into a [`BoxedError`].
pub trait BoxedErrorExt<T> {
    fn boxed(self) -> BoxedErrorResult<T>;
}

impl<T, E> BoxedErrorExt<T> for result::Result<T, E>
where
    E: error::Error + Send + Sync + 'static,
{
    fn boxed(self) -> BoxedErrorResult<T> {
        self.map_err(|err| Box::new(err) as BoxedError)
    }
}
