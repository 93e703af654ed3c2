//! Layering primitives for composing decorators.
//!
//! A [`Layer`] wraps an inner object and produces a new one, typically adding behavior before or
//! after delegating to the inner object. Storage decorators and every stage of the outbound
//! transport chain are layers.
//!
//! A [`Stack`] composes layers in a top-down/inside-out order: the first layer pushed sits
//! closest to the inner object, and the last layer pushed is the first to see a call.
//!
//! ```
//! # use telemetry_core::layers::{Layer, Stack};
//! struct Plus(u32);
//!
//! impl Layer<u32> for Plus {
//!     type Output = u32;
//!
//!     fn layer(&self, inner: u32) -> u32 {
//!         inner + self.0
//!     }
//! }
//!
//! let total = Stack::new(1).push(Plus(2)).push(Plus(3)).into_inner();
//! assert_eq!(total, 6);
//! ```

/// Decorates an object by wrapping it within another type.
pub trait Layer<R> {
    /// The output type after wrapping.
    type Output;

    /// Wraps `inner` based on this layer.
    fn layer(&self, inner: R) -> Self::Output;
}

/// An optional layer.
///
/// `None` leaves the inner object untouched, so an unconfigured layer is absent from the stack
/// rather than present as a pass-through. Only layers that preserve the type of the object they
/// wrap can be optional.
impl<R, L> Layer<R> for Option<L>
where
    L: Layer<R, Output = R>,
{
    type Output = R;

    fn layer(&self, inner: R) -> Self::Output {
        match self {
            Some(layer) => layer.layer(inner),
            None => inner,
        }
    }
}

/// Builder for composing layers together in a top-down/inside-out order.
pub struct Stack<R> {
    inner: R,
}

impl<R> Stack<R> {
    /// Creates a new `Stack` around the given object.
    pub fn new(inner: R) -> Self {
        Stack { inner }
    }

    /// Pushes the given layer on to the stack, wrapping the existing stack.
    pub fn push<L: Layer<R>>(self, layer: L) -> Stack<L::Output> {
        Stack::new(layer.layer(self.inner))
    }

    /// Consumes the stack, returning the fully wrapped object.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
