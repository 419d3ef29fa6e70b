//! USB hotplug watcher.
//!
//! Subscribes to the kernel device-event stream filtered to `usb` subsystem
//! devices of type `usb_device`, so hubs and interfaces stay quiet and only
//! whole-device attach/detach events come through. The monitor socket is
//! non-blocking; the loop drains it and naps between polls.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, info};
use vigil_core::event::EventKind;

use super::{WatchCtx, WatchError, POLL_INTERVAL};

/// Watches the device bus, emitting a `USB` event per attach/detach.
pub fn run(ctx: WatchCtx<'_>) -> Result<(), WatchError> {
    let socket = udev::MonitorBuilder::new()?
        .match_subsystem_devtype("usb", "usb_device")?
        .listen()?;
    info!("watching USB device events");

    while ctx.run.is_running() {
        let mut idle = true;
        for event in socket.iter() {
            idle = false;
            let message = describe(&event);
            debug!(message = %message, "device event");
            ctx.emit(EventKind::Usb, &message);
        }
        if idle {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    Ok(())
}

fn describe(event: &udev::Event) -> String {
    let action = event
        .action()
        .map_or_else(|| "event".to_string(), |a| a.to_string_lossy().into_owned());
    let vendor = event
        .attribute_value("idVendor")
        .map(|v| v.to_string_lossy().into_owned());
    let product = event
        .attribute_value("idProduct")
        .map(|p| p.to_string_lossy().into_owned());
    format_message(&action, vendor.as_deref(), product.as_deref(), event.devnode())
}

/// `"USB device <action>"`, with vendor/product and device node appended
/// when the kernel reported them.
fn format_message(
    action: &str,
    vendor: Option<&str>,
    product: Option<&str>,
    devnode: Option<&Path>,
) -> String {
    let mut message = format!("USB device {action}");
    if let (Some(vendor), Some(product)) = (vendor, product) {
        let _ = write!(message, " (Vendor: {vendor}, Product: {product})");
    }
    if let Some(node) = devnode {
        let _ = write!(message, " at {}", node.display());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_only() {
        assert_eq!(format_message("remove", None, None, None), "USB device remove");
    }

    #[test]
    fn full_attach_message() {
        let message = format_message(
            "add",
            Some("0781"),
            Some("5567"),
            Some(Path::new("/dev/bus/usb/001/004")),
        );
        assert_eq!(
            message,
            "USB device add (Vendor: 0781, Product: 5567) at /dev/bus/usb/001/004"
        );
    }

    #[test]
    fn vendor_without_product_is_omitted() {
        assert_eq!(
            format_message("add", Some("0781"), None, None),
            "USB device add"
        );
    }
}
