//! Continuation signals returned by handlers.

use crate::error::{BoxError, HandlerError, HandlerResult};

/// Whether dispatch proceeds to the next handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Run the next applicable handler.
    #[default]
    Continue,
    /// The update is claimed; no further handler runs for it.
    Stop,
}

impl Flow {
    /// Returns `true` for [`Flow::Stop`].
    pub fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Conversion from a callback's return value into a handler outcome.
///
/// Returning nothing (`()`) means [`Flow::Continue`]. `Err` values become
/// [`HandlerError::Failed`].
pub trait IntoFlow {
    /// Performs the conversion.
    fn into_flow(self) -> HandlerResult;
}

impl IntoFlow for Flow {
    fn into_flow(self) -> HandlerResult {
        Ok(self)
    }
}

impl IntoFlow for () {
    fn into_flow(self) -> HandlerResult {
        Ok(Flow::Continue)
    }
}

impl IntoFlow for Option<Flow> {
    fn into_flow(self) -> HandlerResult {
        Ok(self.unwrap_or_default())
    }
}

impl<T, E> IntoFlow for Result<T, E>
where
    T: IntoFlow,
    E: Into<BoxError>,
{
    fn into_flow(self) -> HandlerResult {
        match self {
            Ok(value) => value.into_flow(),
            Err(err) => Err(HandlerError::Failed(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_and_none_continue() {
        assert_eq!(().into_flow().unwrap(), Flow::Continue);
        assert_eq!(None::<Flow>.into_flow().unwrap(), Flow::Continue);
        assert_eq!(Some(Flow::Stop).into_flow().unwrap(), Flow::Stop);
    }

    #[test]
    fn test_result_err_is_failure() {
        let res: Result<Flow, std::io::Error> = Err(std::io::Error::other("boom"));
        assert!(matches!(res.into_flow(), Err(HandlerError::Failed(_))));

        let ok: Result<(), std::io::Error> = Ok(());
        assert_eq!(ok.into_flow().unwrap(), Flow::Continue);
    }
}
