//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Future` from an async block
///
/// The body is moved into an `async move` block and must evaluate to
/// `Option<Action>`.
///
/// # Example
///
/// ```rust,ignore
/// use tool_exchange_core::async_effect;
///
/// async_effect! {
///     let payload = resolver.resolve(&source, &descriptor).await;
///     Some(TargetAction::AcceptFinished { source, notice })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}
