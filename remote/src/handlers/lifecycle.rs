//! `DEV_OPTS`, `DEVICE_ADD`, `DEVICE_DEL`, `DEVICE_RESET` (spec.md §4.5).

use remote_link::{LinkError, OwnedFrame};
use remote_wire::Payload;
use serde_json::Value;

use super::{notify_and_release, take_waiter, Ctx};
use crate::device::strip_reserved_keys;
use crate::error::HandlerError;

fn bytestream(frame: &OwnedFrame) -> Result<&[u8], LinkError> {
    match &frame.frame.payload {
        Payload::Bytestream(b) => Ok(b),
        _ => Err(LinkError::Resource("expected a bytestream payload".into())),
    }
}

/// **Device add (DEV_OPTS)** (spec.md §4.5): parses JSON into an options
/// dictionary, strips reserved keys, creates the device via its driver's
/// factory, installs it into `devices[msg.id]` (growing the vector), and
/// notifies `REMOTE_OK`/`REMOTE_FAIL`.
pub fn handle_dev_opts(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    let body = bytestream(frame)?.to_vec();
    let waiter = take_waiter(ctx, frame, 0)?;

    let outcome = (|| -> Result<(), HandlerError> {
        let value: Value = serde_json::from_slice(&body)?;
        let mut options = value.as_object().cloned().unwrap_or_default();
        let driver = options
            .get("driver")
            .and_then(Value::as_str)
            .ok_or(HandlerError::MissingField("driver"))?
            .to_string();
        let name = options
            .get("id")
            .and_then(Value::as_str)
            .ok_or(HandlerError::MissingField("id"))?
            .to_string();
        options = strip_reserved_keys(options);

        let device = ctx.factories.create(&driver, &options)?;
        ctx.registry.add(id, name, device);
        Ok(())
    })();

    match outcome {
        Ok(()) => notify_and_release(ctx, waiter, HandlerError::REMOTE_OK),
        Err(e) => {
            tracing::warn!(id, error = %e, "DEV_OPTS failed");
            notify_and_release(ctx, waiter, HandlerError::REMOTE_FAIL);
        }
    }
    Ok(())
}

/// Generic device-add notification path (spec.md §4.5's table: distinct
/// from `DEV_OPTS`, always acknowledges with `1`).
pub fn handle_device_add(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let body = bytestream(frame)?;
    if serde_json::from_slice::<Value>(body).is_err() {
        tracing::warn!("DEVICE_ADD payload is not valid JSON");
    }
    let waiter = take_waiter(ctx, frame, 0)?;
    notify_and_release(ctx, waiter, 1);
    Ok(())
}

/// Resolves the device by name (not by integer id, spec.md §4.5) and
/// unplugs it.
pub fn handle_device_del(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let body = bytestream(frame)?.to_vec();
    let waiter = take_waiter(ctx, frame, 0)?;

    let outcome = (|| -> Result<(), HandlerError> {
        let value: Value = serde_json::from_slice(&body)?;
        let name = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or(HandlerError::MissingField("id"))?;
        ctx.registry.remove_by_name(name)
    })();

    match outcome {
        Ok(()) => notify_and_release(ctx, waiter, 1),
        Err(e) => {
            tracing::warn!(error = %e, "DEVICE_DEL failed");
            notify_and_release(ctx, waiter, HandlerError::REMOTE_FAIL);
        }
    }
    Ok(())
}

/// `DEVICE_RESET` is excluded from the dispatcher's automatic id lookup
/// (spec.md §4.5's exclusion list); it best-effort resets the device at
/// `id` if one happens to exist, and always notifies `0` when a wait-fd was
/// attached (spec.md §4.5's table: "0 or 1 (wait)").
pub fn handle_device_reset(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    if let Some(slot) = ctx.registry.get_mut(id) {
        slot.device.reset();
    }
    if frame.fd_count() > 0 {
        let waiter = take_waiter(ctx, frame, 0)?;
        notify_and_release(ctx, waiter, 0);
    }
    Ok(())
}
