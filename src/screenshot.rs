//! Best-effort multi-monitor screenshot capture (§4.5 step 3). Gated behind
//! the `screenshot` feature since it pulls in platform windowing bindings
//! the rest of the collector has no other use for. Mirrors the original's
//! `mss`-based capture of every connected monitor into one combined PNG.

#[cfg(feature = "screenshot")]
pub fn capture() -> Option<Vec<u8>> {
    use image::{GenericImage, RgbaImage};

    let monitors = match xcap::Monitor::all() {
        Ok(monitors) => monitors,
        Err(e) => {
            log::error!("unable to enumerate monitors for screenshot: {e}");
            return None;
        }
    };
    if monitors.is_empty() {
        return None;
    }

    let mut captures = Vec::new();
    for monitor in &monitors {
        match monitor.capture_image() {
            Ok(img) => captures.push(img),
            Err(e) => log::warn!("unable to capture one monitor: {e}"),
        }
    }
    if captures.is_empty() {
        log::error!("unable to take screenshot");
        return None;
    }

    let total_width: u32 = captures.iter().map(|img| img.width()).sum();
    let max_height: u32 = captures.iter().map(|img| img.height()).max().unwrap_or(0);
    let mut canvas = RgbaImage::new(total_width, max_height);
    let mut x_offset = 0;
    for img in &captures {
        if canvas.copy_from(img, x_offset, 0).is_err() {
            log::warn!("failed to composite one monitor into the combined screenshot");
        }
        x_offset += img.width();
    }

    let mut bytes = Vec::new();
    let encoded = image::DynamicImage::ImageRgba8(canvas).write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    );
    match encoded {
        Ok(()) => Some(bytes),
        Err(e) => {
            log::error!("failed to encode screenshot as PNG: {e}");
            None
        }
    }
}

#[cfg(not(feature = "screenshot"))]
pub fn capture() -> Option<Vec<u8>> {
    log::info!("screenshot support was not compiled in");
    None
}
