//! Resource creation hook

/// Error type returned by factories
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Creates the resources a pool manages
///
/// Implemented for any `Fn() -> Result<T, E>` closure, so most hosts never
/// implement it by hand.
///
/// # Examples
///
/// ```
/// use adaptive_resource_pool::ResourceFactory;
///
/// let factory = || Ok::<_, std::io::Error>(String::from("engine"));
/// assert_eq!(factory.create().unwrap(), "engine");
/// ```
pub trait ResourceFactory<T>: Send + Sync {
    /// Build one resource. May block; the size manager calls it off the async runtime.
    fn create(&self) -> Result<T, BoxError>;
}

impl<T, E, F> ResourceFactory<T> for F
where
    F: Fn() -> Result<T, E> + Send + Sync,
    E: Into<BoxError>,
{
    fn create(&self) -> Result<T, BoxError> {
        self().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_errors_are_boxed() {
        let factory = || Err::<u32, _>(std::io::Error::other("out of engines"));
        let err = factory.create().unwrap_err();
        assert_eq!(err.to_string(), "out of engines");
    }
}
