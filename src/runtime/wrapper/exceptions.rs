//! Exception normalization for wrapped error values.
//!
//! Foreign-side exception propagation reads the `args` and `cause` fields of
//! an exception object directly, so an error-like instance is only usable
//! once both are filled in.

use tracing::warn;

use crate::{
    error::{BridgeError, ForeignError},
    foreign::{OwnedRef, slot::ObjectLayout},
    runtime::{
        bridge::Bridge,
        gil::Gil,
        managed::{CapturedError, ManagedInstance},
        wrapper::WrapperObject,
    },
};

pub trait ExceptionProtocol {
    /// Fills the exception protocol fields of `wrapper`'s foreign object if
    /// its instance is error-like; otherwise does nothing.
    fn set_args_and_cause(
        &self,
        gil: Gil<'_>,
        bridge: &Bridge,
        wrapper: &WrapperObject,
    ) -> Result<(), BridgeError>;
}

/// `args` is a 1-tuple of the error's message, or `()` when the message is
/// empty. The `source()` chain is captured by value and wrapped with the same
/// foreign type as the outer error, then stored as `cause`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardExceptions;

impl ExceptionProtocol for StandardExceptions {
    fn set_args_and_cause(
        &self,
        gil: Gil<'_>,
        bridge: &Bridge,
        wrapper: &WrapperObject,
    ) -> Result<(), BridgeError> {
        let Some(error) = wrapper.instance().as_error() else {
            return Ok(());
        };

        let ty = wrapper.type_descriptor();
        if !ty.has_exception_layout() {
            if bridge.config().require_exception_layout {
                return Err(BridgeError::ExceptionLayout(ty.name().to_string()));
            }
            warn!(ty = ty.name(), "error-like instance wrapped without exception layout");
            return Ok(());
        }

        let heap = bridge.heap();
        let layout = ObjectLayout::new(heap.as_ref(), ty);

        let message = error.to_string();
        let args = if message.is_empty() {
            heap.new_tuple(gil, &[]).map_err(allocation("tuple"))?
        } else {
            let text = heap.new_str(gil, &message).map_err(allocation("str"))?;
            let text = OwnedRef::steal(heap, text);
            let args = heap.new_tuple(gil, &[text.object()]).map_err(allocation("tuple"))?;
            text.release(gil);
            args
        };
        let args = OwnedRef::steal(heap, args);
        layout.write_exception_args(gil, wrapper.object(), args.object())?;
        args.into_raw();

        if let Some(source) = error.source() {
            let cause_instance = ManagedInstance::from_error(CapturedError::capture(source));
            let cause = WrapperObject::construct(gil, bridge, cause_instance, ty)?;
            if let Err(err) = layout.write_exception_cause(gil, wrapper.object(), cause.object()) {
                cause.release(gil, bridge)?;
                return Err(err);
            }
        }

        Ok(())
    }
}

fn allocation(type_name: &'static str) -> impl Fn(ForeignError) -> BridgeError {
    move |source| BridgeError::Allocation {
        type_name: type_name.to_string(),
        source,
    }
}
